//! Dicionário geográfico dos bairros de Porto Alegre e a correspondência
//! por maior-prefixo usada pela análise de consultas.
//!
//! A correspondência é insensível a caixa e acentos e prefere sempre o
//! nome mais longo, para que "Boa Vista do Sul" nunca case também como
//! "Boa Vista". O nome da própria cidade não está no dicionário e jamais
//! vira entidade de bairro.

use once_cell::sync::Lazy;

use crate::normalize;

/// Nomes oficiais dos bairros (maiúsculas, com acentos), como aparecem na
/// base do regime urbanístico antes da canonicalização.
const OFFICIAL_NAMES: &[&str] = &[
    "ABERTA DOS MORROS",
    "AGRONOMIA",
    "ANCHIETA",
    "ARQUIPÉLAGO",
    "AUXILIADORA",
    "AZENHA",
    "BELA VISTA",
    "BELÉM NOVO",
    "BELÉM VELHO",
    "BOA VISTA",
    "BOA VISTA DO SUL",
    "BOM FIM",
    "BOM JESUS",
    "CAMAQUÃ",
    "CAMPO NOVO",
    "CASCATA",
    "CAVALHADA",
    "CENTRO HISTÓRICO",
    "CHÁCARA DAS PEDRAS",
    "CHAPÉU DO SOL",
    "CIDADE BAIXA",
    "CORONEL APARÍCIO BORGES",
    "COSTA E SILVA",
    "CRISTAL",
    "CRISTO REDENTOR",
    "ESPÍRITO SANTO",
    "EXTREMA",
    "FARRAPOS",
    "FARROUPILHA",
    "FLORESTA",
    "GLÓRIA",
    "GUARUJÁ",
    "HIGIENÓPOLIS",
    "HÍPICA",
    "HUMAITÁ",
    "INDEPENDÊNCIA",
    "IPANEMA",
    "JARDIM BOTÂNICO",
    "JARDIM CARVALHO",
    "JARDIM DO SALSO",
    "JARDIM EUROPA",
    "JARDIM FLORESTA",
    "JARDIM ISABEL",
    "JARDIM ITU",
    "JARDIM LEOPOLDINA",
    "JARDIM LINDÓIA",
    "JARDIM SABARÁ",
    "JARDIM SÃO PEDRO",
    "LAGEADO",
    "LAMI",
    "LOMBA DO PINHEIRO",
    "MÁRIO QUINTANA",
    "MEDIANEIRA",
    "MENINO DEUS",
    "MOINHOS DE VENTO",
    "MONT'SERRAT",
    "MORRO SANTANA",
    "NAVEGANTES",
    "NONOAI",
    "PARQUE SANTA FÉ",
    "PARTENON",
    "PASSO DA AREIA",
    "PASSO DAS PEDRAS",
    "PEDRA REDONDA",
    "PETRÓPOLIS",
    "PONTA GROSSA",
    "PRAIA DE BELAS",
    "PROTÁSIO ALVES",
    "RESTINGA",
    "RIO BRANCO",
    "RUBEM BERTA",
    "SANTA CECÍLIA",
    "SANTA MARIA GORETTI",
    "SANTA ROSA DE LIMA",
    "SANTA TEREZA",
    "SANTANA",
    "SANTO ANTÔNIO",
    "SÃO CAETANO",
    "SÃO GERALDO",
    "SÃO JOÃO",
    "SÃO SEBASTIÃO",
    "SARANDI",
    "SERRARIA",
    "SÉTIMO CÉU",
    "TERESÓPOLIS",
    "TRÊS FIGUEIRAS",
    "TRISTEZA",
    "VILA ASSUNÇÃO",
    "VILA CONCEIÇÃO",
    "VILA IPIRANGA",
    "VILA JARDIM",
    "VILA JOÃO PESSOA",
    "VILA NOVA",
    "VILA SÃO JOSÉ",
];

/// Pares (forma canônica, nome oficial), ordenados da forma canônica mais
/// longa para a mais curta.
static ENTRIES: Lazy<Vec<(String, &'static str)>> = Lazy::new(|| {
    let mut entries: Vec<(String, &'static str)> = OFFICIAL_NAMES
        .iter()
        .map(|official| (normalize::fold(official), *official))
        .collect();
    entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    entries
});

/// Devolve o nome oficial (com acentos) de uma forma canônica, se o bairro
/// existir no dicionário.
pub fn display_name(canonical: &str) -> Option<&'static str> {
    ENTRIES
        .iter()
        .find(|(folded, _)| folded == canonical)
        .map(|(_, official)| *official)
}

/// Procura menções a bairros na pergunta, preferindo o nome mais longo e
/// consumindo o trecho casado, de modo que nomes contidos em outros não
/// gerem falsos positivos. Devolve as formas canônicas, na ordem de
/// descoberta (mais longos primeiro).
pub fn find_bairros(question: &str) -> Vec<String> {
    let folded = normalize::fold(question);
    let mut taken: Vec<(usize, usize)> = Vec::new();
    let mut found = Vec::new();

    for (name, _) in ENTRIES.iter() {
        let mut search_from = 0;
        while let Some(rel) = folded[search_from..].find(name.as_str()) {
            let start = search_from + rel;
            let end = start + name.len();

            let boundary_before = folded[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric());
            let boundary_after = folded[end..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric());
            let overlaps = taken.iter().any(|&(s, e)| start < e && s < end);

            if boundary_before && boundary_after && !overlaps {
                taken.push((start, end));
                found.push(name.clone());
                break;
            }
            search_from = start + 1;
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encontra_bairro_simples() {
        assert_eq!(find_bairros("qual a altura máxima do Petrópolis?"), vec!["PETROPOLIS"]);
    }

    #[test]
    fn correspondencia_insensivel_a_acentos_e_caixa() {
        assert_eq!(find_bairros("tres figueiras"), vec!["TRES FIGUEIRAS"]);
        assert_eq!(find_bairros("TRÊS FIGUEIRAS"), vec!["TRES FIGUEIRAS"]);
    }

    #[test]
    fn nome_mais_longo_vence() {
        assert_eq!(
            find_bairros("o que pode ser construído na Boa Vista do Sul?"),
            vec!["BOA VISTA DO SUL"]
        );
    }

    #[test]
    fn dois_bairros_distintos_sao_retidos() {
        let found = find_bairros("qual a diferença entre Boa Vista e Boa Vista do Sul?");
        assert!(found.contains(&"BOA VISTA DO SUL".to_string()));
        assert!(found.contains(&"BOA VISTA".to_string()));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn nome_da_cidade_nunca_e_bairro() {
        assert!(find_bairros("Porto Alegre").is_empty());
        assert!(find_bairros("qual a maior altura de Porto Alegre?").is_empty());
    }

    #[test]
    fn nao_casa_substring_dentro_de_palavra() {
        // "CRISTALINA" não deve casar "CRISTAL".
        assert!(find_bairros("pedra cristalina").is_empty());
    }

    #[test]
    fn display_name_devolve_forma_oficial() {
        assert_eq!(display_name("TRES FIGUEIRAS"), Some("TRÊS FIGUEIRAS"));
        assert_eq!(display_name("INEXISTENTE"), None);
    }
}

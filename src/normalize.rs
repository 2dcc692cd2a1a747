//! Normalização de texto compartilhada pelo pipeline: remoção de acentos,
//! formas canônicas de bairros e zonas, e a impressão digital usada como
//! chave de cache.
//!
//! A mesma canonicalização é aplicada na fronteira de ingestão e nos
//! caminhos de leitura, para que a correspondência seja sempre exata.

use once_cell::sync::Lazy;
use regex::Regex;

/// Remove diacríticos dos caracteres do português (e do espanhol, por via
/// das dúvidas), preservando os demais.
pub fn remove_accents(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            'ñ' => 'n',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

/// Forma canônica usada em comparações: maiúsculas sem acentos.
pub fn fold(input: &str) -> String {
    remove_accents(input).to_uppercase()
}

/// Colapsa qualquer sequência de espaços em um único espaço.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normaliza um nome de bairro: remove prefixos como "no bairro", pontuação
/// final e acentos, e devolve a forma canônica em maiúsculas.
pub fn normalize_bairro(input: &str) -> String {
    let mut s = collapse_whitespace(&fold(input));

    for prefix in [
        "NO BAIRRO ",
        "DO BAIRRO ",
        "DA BAIRRO ",
        "DE BAIRRO ",
        "EM BAIRRO ",
        "BAIRRO ",
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.to_string();
            break;
        }
    }

    s.trim_end_matches(['.', '?', '!']).trim().to_string()
}

static ZONA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:ZOT|ZONA)?\s*-?\s*0*(\d+)(?:\.(\d+))?\s*-?\s*([A-Ea-e])?\s*$")
        .expect("expressão regular de zona inválida")
});

/// Normaliza um código de zona para o formato canônico `ZOT NN[.S][-L]`
/// (ex.: "zona 7" → "ZOT 07", "zot8.3 c" → "ZOT 08.3-C").
pub fn normalize_zona(input: &str) -> String {
    match ZONA_RE.captures(input) {
        Some(cap) => {
            let major: u32 = cap[1].parse().unwrap_or(0);
            let mut out = format!("ZOT {major:02}");
            if let Some(minor) = cap.get(2) {
                out.push('.');
                out.push_str(minor.as_str());
            }
            if let Some(sub) = cap.get(3) {
                out.push('-');
                out.push_str(&sub.as_str().to_uppercase());
            }
            out
        }
        None => fold(input.trim()),
    }
}

/// Impressão digital de uma pergunta para o cache: minúsculas, sem acentos,
/// espaços colapsados e pontuação final removida. Aplicada de forma idêntica
/// na leitura e na escrita.
pub fn fingerprint(question: &str) -> String {
    let folded = remove_accents(question).to_lowercase();
    let collapsed = collapse_whitespace(&folded);
    collapsed.trim_end_matches(['?', '!', '.']).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_accents_cobre_portugues() {
        assert_eq!(remove_accents("Petrópolis"), "Petropolis");
        assert_eq!(remove_accents("TRÊS FIGUEIRAS"), "TRES FIGUEIRAS");
        assert_eq!(remove_accents("ocupação e aproveitamento"), "ocupacao e aproveitamento");
    }

    #[test]
    fn fold_e_maiusculas_sem_acentos() {
        assert_eq!(fold("Boa Vista do Sul"), "BOA VISTA DO SUL");
        assert_eq!(fold("higienópolis"), "HIGIENOPOLIS");
    }

    #[test]
    fn normalize_bairro_remove_prefixos() {
        assert_eq!(normalize_bairro("no bairro Petrópolis"), "PETROPOLIS");
        assert_eq!(normalize_bairro("bairro Três Figueiras"), "TRES FIGUEIRAS");
        assert_eq!(normalize_bairro("cristal."), "CRISTAL");
    }

    #[test]
    fn normalize_zona_padroniza_formatos() {
        assert_eq!(normalize_zona("zona 7"), "ZOT 07");
        assert_eq!(normalize_zona("ZOT7"), "ZOT 07");
        assert_eq!(normalize_zona("zot 08.3-c"), "ZOT 08.3-C");
        assert_eq!(normalize_zona("ZONA 12"), "ZOT 12");
    }

    #[test]
    fn fingerprint_ignora_acentos_caixa_e_espacos() {
        let a = fingerprint("Qual a altura máxima do Petrópolis?");
        let b = fingerprint("  qual a ALTURA maxima do petropolis ");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_remove_pontuacao_final() {
        assert_eq!(fingerprint("cristal."), fingerprint("Cristal"));
    }
}

//! Text normalization shared by label matching and outcome markers.
//!
//! Labels on the target forms mix Turkish and English, with and without
//! diacritics ("ÖĞRENCİ NO", "Ogrenci no"). Everything is folded to
//! lowercase ASCII-ish text before comparison, and phrases match on whole
//! tokens only.

/// Lowercase `text`, fold Turkish letters to their ASCII base and collapse
/// whitespace.
pub(crate) fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            'İ' | 'I' | 'ı' => out.push('i'),
            'Ğ' | 'ğ' => out.push('g'),
            'Ü' | 'ü' => out.push('u'),
            'Ş' | 'ş' => out.push('s'),
            'Ö' | 'ö' => out.push('o'),
            'Ç' | 'ç' => out.push('c'),
            '\u{307}' => {}
            other => out.extend(other.to_lowercase()),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Folded alphanumeric tokens of `text`.
pub(crate) fn tokens(text: &str) -> Vec<String> {
    fold(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `phrase` (already folded, space separated) occurs in `tokens` as a
/// contiguous run of whole tokens.
pub(crate) fn has_phrase(tokens: &[String], phrase: &str) -> bool {
    let wanted: Vec<&str> = phrase.split(' ').collect();
    if wanted.is_empty() || wanted.len() > tokens.len() {
        return false;
    }
    tokens
        .windows(wanted.len())
        .any(|window| window.iter().zip(&wanted).all(|(have, want)| have == want))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_turkish() {
        assert_eq!(fold("ÖĞRENCİ  NUMARASI"), "ogrenci numarasi");
        assert_eq!(fold("Adınız Soyadınız"), "adiniz soyadiniz");
        assert_eq!(fold("Katılım Onayı"), "katilim onayi");
    }

    #[test]
    fn test_phrase_is_token_bounded() {
        let t = tokens("Please enter a valid value");
        assert!(!has_phrase(&t, "id"));
        assert!(has_phrase(&t, "valid value"));

        let t = tokens("Student ID *");
        assert!(has_phrase(&t, "id"));
        assert!(has_phrase(&t, "student id"));
        assert!(!has_phrase(&t, "id student"));
    }

    #[test]
    fn test_empty_phrase_never_matches() {
        assert!(!has_phrase(&tokens("name"), "full name"));
        assert!(!has_phrase(&[], "name"));
    }
}

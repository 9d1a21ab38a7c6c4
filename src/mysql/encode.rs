//! MySQL filesystem name encoding.

/// Encode a database name the way MySQL encodes it when creating the schema
/// directory on disk.
///
/// Characters outside MySQL's safe set are replaced by `@XXXX` where `XXXX`
/// is the lower-case hex code point, e.g. `-` becomes `@002d` and `.`
/// becomes `@002e`.
pub fn encode_database_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '-' | '.' | ' ' | '$' | '!' | '#' | '%' | '&' | '(' | ')' | '*' | '+' | ',' | '/'
            | ':' | ';' | '<' | '=' | '>' | '?' | '@' | '[' | '\\' | ']' | '^' | '{' | '|'
            | '}' | '~' => {
                encoded.push('@');
                encoded.push_str(&format!("{:04x}", c as u32));
            }
            _ => encoded.push(c),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_are_untouched() {
        assert_eq!(encode_database_name("demo1"), "demo1");
        assert_eq!(encode_database_name("my_app_db"), "my_app_db");
    }

    #[test]
    fn special_characters_are_hex_encoded() {
        assert_eq!(encode_database_name("d-e-m-o-2"), "d@002de@002dm@002do@002d2");
        assert_eq!(encode_database_name("a.b"), "a@002eb");
        assert_eq!(encode_database_name("with space"), "with@0020space");
        assert_eq!(encode_database_name("pct%"), "pct@0025");
    }

    #[test]
    fn mixed_names_keep_safe_characters() {
        assert_eq!(encode_database_name("app-v2.1"), "app@002dv2@002e1");
    }
}

//! Keyword table for the Indonesian vocabulary.

use crate::token::TokenKind;

/// Probes identifier text against the keyword table. Unknown text stays an
/// identifier.
pub fn lookup_keyword(text: &str) -> TokenKind {
    match text {
        "jika" => TokenKind::If,
        "maka" => TokenKind::Then,
        "kalau" => TokenKind::ElseIf,
        "sebaliknya" => TokenKind::Else,
        "tutup" => TokenKind::End,
        "fungsi" => TokenKind::Function,
        "kembali" => TokenKind::Return,
        "lokal" => TokenKind::Var,
        "tetap" => TokenKind::Const,
        "selama" => TokenKind::While,
        "untuk" => TokenKind::For,
        "ke" => TokenKind::To,
        "langkah" => TokenKind::Step,
        "lakukan" => TokenKind::Do,
        "coba" => TokenKind::Try,
        "tangkap" => TokenKind::Catch,
        "kelas" => TokenKind::Class,
        "benar" => TokenKind::True,
        "salah" => TokenKind::False,
        "nil" => TokenKind::Nil,
        "dan" => TokenKind::And,
        "atau" => TokenKind::Or,
        "string" => TokenKind::TypeString,
        "boolean" => TokenKind::TypeBoolean,
        "int32" => TokenKind::TypeInt32,
        _ => TokenKind::Identifier,
    }
}

/// Human-readable category for a token kind, used in "ditemukan <x>"
/// diagnostic tails.
pub fn token_category(kind: TokenKind, lexeme: &str) -> String {
    match kind {
        TokenKind::Number => "angka".to_string(),
        TokenKind::String => "string".to_string(),
        TokenKind::Identifier => "identitas".to_string(),
        TokenKind::EndOfFile => "akhir file (EOF)".to_string(),
        _ => format!("'{lexeme}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_keywords_and_leaves_identifiers() {
        assert_eq!(lookup_keyword("jika"), TokenKind::If);
        assert_eq!(lookup_keyword("tutup"), TokenKind::End);
        assert_eq!(lookup_keyword("langkah"), TokenKind::Step);
        assert_eq!(lookup_keyword("jikalau"), TokenKind::Identifier);
        assert_eq!(lookup_keyword(""), TokenKind::Identifier);
    }

    #[test]
    fn both_else_spellings_are_distinct_kinds() {
        assert_eq!(lookup_keyword("kalau"), TokenKind::ElseIf);
        assert_eq!(lookup_keyword("sebaliknya"), TokenKind::Else);
    }
}

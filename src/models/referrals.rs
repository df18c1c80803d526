use serde::{Deserialize, Serialize};

/// Ancestor ids are stored as a single delimited string, oldest ancestor
/// first, the immediate sponsor appended last. The string format exists only
/// at the persistence boundary; everything in memory works on `Vec<i64>`.
const DELIMITER: char = 'D';

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Referral {
    pub id: i64,
    pub user_id: i64,
    pub code: String,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// Builds the code for a newly referred user: the sponsor's own code with the
/// sponsor's id appended. An empty sponsor code is legal (first generation).
pub fn encode_code(sponsor_code: &str, sponsor_id: i64) -> String {
    format!("{sponsor_code}{DELIMITER}{sponsor_id}")
}

/// Splits a code into ancestor ids, oldest first. Tokens that do not parse
/// as a positive integer are skipped, never an error.
pub fn decode_code(code: &str) -> Vec<i64> {
    code.split(DELIMITER)
        .filter_map(|token| token.parse::<i64>().ok())
        .filter(|id| *id > 0)
        .collect()
}

/// Ancestors in upward-walk order: immediate sponsor first, root last. All
/// commission walks consume this ordering.
pub fn ancestors_nearest_first(code: &str) -> Vec<i64> {
    let mut ids = decode_code(code);
    ids.reverse();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_appends_sponsor_id() {
        assert_eq!(encode_code("", 7), "D7");
        assert_eq!(encode_code("D7", 9), "D7D9");
        assert_eq!(encode_code("D7D9", 12), "D7D9D12");
    }

    #[test]
    fn decode_round_trips_a_chain() {
        let mut code = String::new();
        for id in [3_i64, 15, 42] {
            code = encode_code(&code, id);
        }
        assert_eq!(decode_code(&code), vec![3, 15, 42]);
    }

    #[test]
    fn decode_of_empty_code_is_empty() {
        assert!(decode_code("").is_empty());
    }

    #[test]
    fn malformed_tokens_are_skipped_not_errors() {
        assert_eq!(decode_code("D3DxyzD15D-4D0D42"), vec![3, 15, 42]);
        // Stray delimiters produce empty tokens, also skipped.
        assert_eq!(decode_code("DD5DD"), vec![5]);
    }

    #[test]
    fn walk_order_is_sponsor_first() {
        // A referred B referred C: C's code is "D{A}D{B}".
        let code = encode_code(&encode_code("", 1), 2);
        assert_eq!(ancestors_nearest_first(&code), vec![2, 1]);
    }
}

// src/utils/id_generator.rs
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    User,
    Ride,
    PaymentIntent,
    Refund,
}

impl IdType {
    pub fn to_prefix(&self) -> &'static str {
        match self {
            IdType::User => "usr",
            IdType::Ride => "rid",
            IdType::PaymentIntent => "pay",
            IdType::Refund => "ref",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "usr" => Some(IdType::User),
            "rid" => Some(IdType::Ride),
            "pay" => Some(IdType::PaymentIntent),
            "ref" => Some(IdType::Refund),
            _ => None,
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefix())
    }
}

pub struct IdGenerator;

impl IdGenerator {
    /// Generate a unique ID with format: {prefix}-{yymmdd}-{suffix}
    /// where suffix is 3 hex chars + 2 alphanumeric or 3 alphanumeric + 2 hex chars
    pub fn generate(id_type: IdType) -> String {
        Self::generate_with_timestamp(id_type, Utc::now())
    }

    /// Generate ID with a specific timestamp (useful for testing)
    pub fn generate_with_timestamp(id_type: IdType, timestamp: DateTime<Utc>) -> String {
        let date_part = timestamp.format("%y%m%d").to_string();
        format!("{}-{}-{}", id_type.to_prefix(), date_part, Self::random_suffix())
    }

    fn random_suffix() -> String {
        if rand::random::<bool>() {
            format!("{}{}", Self::hex_chars(3), Self::alphanumeric_chars(2))
        } else {
            format!("{}{}", Self::alphanumeric_chars(3), Self::hex_chars(2))
        }
    }

    fn hex_chars(n: usize) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        Self::from_charset(HEX_CHARS, n)
    }

    fn alphanumeric_chars(n: usize) -> String {
        const ALPHANUMERIC_CHARS: &[u8] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        Self::from_charset(ALPHANUMERIC_CHARS, n)
    }

    fn from_charset(charset: &[u8], n: usize) -> String {
        let mut rng = rand::rng();
        (0..n)
            .map(|_| charset[rng.random_range(0..charset.len())] as char)
            .collect()
    }

    /// Parse an ID to extract its components
    pub fn parse_id(id: &str) -> Option<ParsedId> {
        let mut parts = id.split('-');
        let (prefix, date_part, suffix) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || date_part.len() != 6 || suffix.len() != 5 {
            return None;
        }
        if !suffix.chars().all(|c| c.is_ascii_alphanumeric())
            || !date_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let id_type = IdType::from_prefix(prefix)?;
        let year = 2000 + date_part.get(0..2)?.parse::<i32>().ok()?;
        let month = date_part.get(2..4)?.parse::<u32>().ok()?;
        let day = date_part.get(4..6)?.parse::<u32>().ok()?;

        let parsed = ParsedId {
            id_type,
            year,
            month,
            day,
            random_suffix: suffix.to_string(),
        };
        parsed.to_datetime()?;
        Some(parsed)
    }

    /// Validate if an ID matches the expected format and type
    pub fn validate_id(id: &str, expected_type: Option<IdType>) -> bool {
        match Self::parse_id(id) {
            Some(parsed) => expected_type.is_none_or(|expected| parsed.id_type == expected),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedId {
    pub id_type: IdType,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub random_suffix: String,
}

impl ParsedId {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(self.year, self.month, self.day, 0, 0, 0).single()
    }
}

pub fn generate_user_id() -> String {
    IdGenerator::generate(IdType::User)
}

pub fn generate_ride_id() -> String {
    IdGenerator::generate(IdType::Ride)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let ride_id = generate_ride_id();
        assert!(ride_id.starts_with("rid-"));
        assert_eq!(ride_id.split('-').count(), 3);

        assert!(generate_user_id().starts_with("usr-"));
    }

    #[test]
    fn test_id_parsing() {
        let test_date = Utc.with_ymd_and_hms(2023, 12, 7, 0, 0, 0).unwrap();
        let id = IdGenerator::generate_with_timestamp(IdType::Ride, test_date);

        let parsed = IdGenerator::parse_id(&id).unwrap();
        assert_eq!(parsed.id_type, IdType::Ride);
        assert_eq!(parsed.year, 2023);
        assert_eq!(parsed.month, 12);
        assert_eq!(parsed.day, 7);
        assert_eq!(parsed.random_suffix.len(), 5);
        assert_eq!(parsed.to_datetime(), Some(test_date));
    }

    #[test]
    fn test_validation() {
        let valid_id = "usr-231207-a1b2c";
        assert!(IdGenerator::validate_id(valid_id, Some(IdType::User)));
        assert!(!IdGenerator::validate_id(valid_id, Some(IdType::Ride)));
        assert!(IdGenerator::validate_id(valid_id, None));

        assert!(!IdGenerator::validate_id("invalid-format", None));
        assert!(!IdGenerator::validate_id("rid-231341-a1b2c", None)); // month 13
        assert!(!IdGenerator::validate_id("rid-231207-a1b2c-x", None));
    }

    #[test]
    fn test_non_ascii_ids_are_rejected() {
        // Six bytes, but the second char straddles the 2-byte slice boundary
        assert_eq!("1é234".len(), 6);
        assert!(IdGenerator::parse_id("rid-1é234-abcde").is_none());
        assert!(IdGenerator::parse_id("rid-+12345-abcde").is_none());
        assert!(!IdGenerator::validate_id("rid-ééé-abcde", Some(IdType::Ride)));
    }

    #[test]
    fn test_random_suffix_shape() {
        for _ in 0..100 {
            let suffix = IdGenerator::random_suffix();
            assert_eq!(suffix.len(), 5);
            assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()), "bad suffix: {}", suffix);
        }
    }
}

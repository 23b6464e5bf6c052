//! Input validation
//!
//! Builder-style validator collecting field errors; handlers validate
//! request DTOs before touching the engine. Limits mirror the storage
//! schema.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

pub const MAX_NAME_LENGTH: usize = 255;
pub const MAX_EMAIL_LENGTH: usize = 320; // RFC 5321
pub const MAX_SLUG_LENGTH: usize = 128;
pub const MAX_PLATE_LENGTH: usize = 50;
pub const MAX_NOTE_LENGTH: usize = 4096;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

static SLUG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());

/// Registration plates: uppercase alphanumerics with optional spaces
/// (e.g. "T123ABC", "T 123 ABC")
static PLATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9 ]{1,48}$").unwrap());

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub code: String,
}

impl ValidationError {
    pub fn new(field: &str, message: &str, code: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
            code: code.to_string(),
        }
    }
}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Input validator
pub struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new() -> Self {
        Self { errors: vec![] }
    }

    pub fn validate(self) -> ValidationResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    pub fn error(&mut self, field: &str, message: &str, code: &str) -> &mut Self {
        self.errors.push(ValidationError::new(field, message, code));
        self
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.error(field, "Email is required", "required");
        } else if value.len() > MAX_EMAIL_LENGTH {
            self.error(field, "Email is too long", "too_long");
        } else if !EMAIL_REGEX.is_match(value) {
            self.error(field, "Invalid email format", "invalid_format");
        }
        self
    }

    pub fn password(&mut self, field: &str, value: &str) -> &mut Self {
        if value.len() < MIN_PASSWORD_LENGTH {
            self.error(
                field,
                &format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
                "too_short",
            );
        } else if value.len() > MAX_PASSWORD_LENGTH {
            self.error(field, "Password is too long", "too_long");
        }

        let has_uppercase = value.chars().any(|c| c.is_uppercase());
        let has_lowercase = value.chars().any(|c| c.is_lowercase());
        let has_digit = value.chars().any(|c| c.is_ascii_digit());
        if !has_uppercase || !has_lowercase || !has_digit {
            self.error(
                field,
                "Password must contain uppercase, lowercase, and a number",
                "weak_password",
            );
        }
        self
    }

    pub fn name(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, "This field is required", "required");
        } else if value.len() > MAX_NAME_LENGTH {
            self.error(field, "Value is too long", "too_long");
        }
        self
    }

    pub fn slug(&mut self, field: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.error(field, "Slug is required", "required");
        } else if value.len() > MAX_SLUG_LENGTH {
            self.error(field, "Slug is too long", "too_long");
        } else if !SLUG_REGEX.is_match(value) {
            self.error(
                field,
                "Slug must be lowercase alphanumeric with hyphens",
                "invalid_format",
            );
        }
        self
    }

    pub fn registration_plate(&mut self, field: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.error(field, "Registration plate is required", "required");
        } else if value.len() > MAX_PLATE_LENGTH || !PLATE_REGEX.is_match(value) {
            self.error(
                field,
                "Plate must be uppercase letters, digits and spaces",
                "invalid_format",
            );
        }
        self
    }

    /// Cover periods: end strictly after start.
    pub fn date_window(&mut self, field: &str, start: NaiveDate, end: NaiveDate) -> &mut Self {
        if end <= start {
            self.error(field, "End date must be after start date", "invalid_range");
        }
        self
    }

    pub fn positive_amount(&mut self, field: &str, value: Decimal) -> &mut Self {
        if value <= Decimal::ZERO {
            self.error(field, "Amount must be positive", "out_of_range");
        }
        self
    }

    pub fn max_length(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        if value.len() > max {
            self.error(
                field,
                &format!("Must be at most {max} characters"),
                "too_long",
            );
        }
        self
    }

    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, "This field is required", "required");
        }
        self
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_email_validation() {
        let mut v = Validator::new();
        v.email("email", "agent@acme.co.tz");
        assert!(v.validate().is_ok());

        let mut v = Validator::new();
        v.email("email", "not-an-email");
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_password_complexity() {
        let mut v = Validator::new();
        v.password("password", "Str0ngEnough");
        assert!(v.validate().is_ok());

        let mut v = Validator::new();
        v.password("password", "alllowercase1");
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_plate_validation() {
        let mut v = Validator::new();
        v.registration_plate("registration_plate", "T123ABC");
        assert!(v.validate().is_ok());

        let mut v = Validator::new();
        v.registration_plate("registration_plate", "T 123 ABC");
        assert!(v.validate().is_ok());

        let mut v = Validator::new();
        v.registration_plate("registration_plate", "t123abc");
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_date_window() {
        let mut v = Validator::new();
        v.date_window("end_date", date(2025, 1, 1), date(2025, 12, 31));
        assert!(v.validate().is_ok());

        let mut v = Validator::new();
        v.date_window("end_date", date(2025, 1, 1), date(2025, 1, 1));
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_errors_accumulate() {
        let mut v = Validator::new();
        v.email("email", "").slug("slug", "Bad Slug");
        let errors = v.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}

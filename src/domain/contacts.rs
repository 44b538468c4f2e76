//! Field rules for contacts.
//!
//! Inputs are validated once at the boundary. After that the repository and
//! services trust `NewContact` / `ContactPatch` values as-is.

use super::error::DomainError;

pub const NAME_MAX_CHARS: usize = 50;
const EMAIL_MAX_CHARS: usize = 254;

/// Minimum number of digits a search term needs before it is treated as a phone lookup.
pub const PHONE_SEARCH_MIN_DIGITS: usize = 3;

/// Validated input for a new contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl NewContact {
    pub fn parse(name: &str, email: &str, phone: &str) -> Result<Self, DomainError> {
        Ok(Self {
            name: validate_name(name)?,
            email: validate_email(email)?,
            phone: validate_phone(phone)?,
        })
    }
}

/// Validated partial update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactPatch {
    pub fn parse(
        name: Option<&str>,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Self, DomainError> {
        let patch = Self {
            name: name.map(validate_name).transpose()?,
            email: email.map(validate_email).transpose()?,
            phone: phone.map(validate_phone).transpose()?,
        };

        if patch.is_empty() {
            return Err(DomainError::validation(
                "body",
                "at least one of name, email or phone is required",
            ));
        }

        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none()
    }
}

pub fn validate_name(raw: &str) -> Result<String, DomainError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name", "name is required"));
    }
    if name.chars().count() > NAME_MAX_CHARS {
        return Err(DomainError::validation(
            "name",
            format!("name must be at most {NAME_MAX_CHARS} characters long"),
        ));
    }
    Ok(name.to_string())
}

pub fn validate_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim();
    if email.len() > EMAIL_MAX_CHARS || !looks_like_email(email) {
        return Err(DomainError::validation("email", "invalid email address"));
    }
    Ok(email.to_string())
}

/// Phones are kept exactly as supplied (minus surrounding whitespace), but must
/// parse as a valid international number.
pub fn validate_phone(raw: &str) -> Result<String, DomainError> {
    let phone = raw.trim();
    let valid = phonenumber::parse(None, phone)
        .map(|number| phonenumber::is_valid(&number))
        .unwrap_or(false);
    if !valid {
        return Err(DomainError::validation("phone", "invalid phone number"));
    }
    Ok(phone.to_string())
}

/// Strip everything but ASCII digits.
pub fn phone_digits(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_contact_trims_name_and_email() {
        let contact = NewContact::parse("  Ann ", " ann@x.com ", "+55 11 98888-8888")
            .expect("valid contact");
        assert_eq!(contact.name, "Ann");
        assert_eq!(contact.email, "ann@x.com");
        assert_eq!(contact.phone, "+55 11 98888-8888");
    }

    #[test]
    fn name_length_is_bounded() {
        assert!(validate_name(&"a".repeat(50)).is_ok());
        let err = validate_name(&"a".repeat(51)).expect_err("too long");
        assert_eq!(err.field(), "name");
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn email_shape_is_checked() {
        assert!(validate_email("ann@example.com").is_ok());
        for bad in ["ann", "ann@", "@x.com", "ann@x", "a b@x.com", "ann@x..com", "a@b@c.com"] {
            assert!(validate_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn phone_requires_a_real_number() {
        assert!(validate_phone("+55 11 98888-8888").is_ok());
        assert!(validate_phone("not a phone").is_err());
        assert!(validate_phone("12").is_err());
    }

    #[test]
    fn patch_requires_at_least_one_field() {
        let err = ContactPatch::parse(None, None, None).expect_err("empty patch");
        assert_eq!(err.field(), "body");

        let patch = ContactPatch::parse(Some("Bea"), None, None).expect("name only");
        assert_eq!(patch.name.as_deref(), Some("Bea"));
        assert!(patch.email.is_none());
    }

    #[test]
    fn phone_digits_drops_punctuation() {
        assert_eq!(phone_digits("+55 (11) 98888-8888"), "5511988888888");
        assert_eq!(phone_digits("ann"), "");
    }
}

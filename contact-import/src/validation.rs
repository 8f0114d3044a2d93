use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Field, FieldError, RawRow, ValidatedContact};

pub const MAX_COMPANY_NAME_LENGTH: usize = 255;

// Local part is RFC 5322 atext plus dots, domain labels are LDH. Neither side
// admits whitespace or control characters.
static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
    )
    .expect("email pattern is valid")
});

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{7,15}$").expect("phone pattern is valid"));

/// Checks a row against the field rules. Every failing rule is reported.
pub fn validate(row: &RawRow) -> Result<ValidatedContact, Vec<FieldError>> {
    let mut errors = Vec::new();

    let company_name = check_company_name(row.get(Field::CompanyName.column()), &mut errors);
    let email = check_email(row.get(Field::Email.column()), &mut errors);
    let phone_number = check_phone_number(row.get(Field::PhoneNumber.column()), &mut errors);

    match (company_name, email, phone_number) {
        (Some(company_name), Some(email), Some(phone_number)) if errors.is_empty() => {
            Ok(ValidatedContact {
                company_name,
                email,
                phone_number,
            })
        }
        _ => Err(errors),
    }
}

/// Returns the trimmed value, or records a `required` error.
fn required(value: Option<&str>, field: Field, errors: &mut Vec<FieldError>) -> Option<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            errors.push(FieldError::new(
                field,
                format!("The {field} field is required."),
            ));
            None
        }
    }
}

fn check_company_name(value: Option<&str>, errors: &mut Vec<FieldError>) -> Option<String> {
    let name = required(value, Field::CompanyName, errors)?;
    if name.chars().count() > MAX_COMPANY_NAME_LENGTH {
        errors.push(FieldError::new(
            Field::CompanyName,
            format!(
                "The company_name field must not be greater than {MAX_COMPANY_NAME_LENGTH} characters."
            ),
        ));
        return None;
    }
    Some(name)
}

fn check_email(value: Option<&str>, errors: &mut Vec<FieldError>) -> Option<String> {
    let email = required(value, Field::Email, errors)?;
    if !EMAIL_PATTERN.is_match(&email) {
        errors.push(FieldError::new(
            Field::Email,
            "The email field must be a valid email address.",
        ));
        return None;
    }
    Some(email)
}

fn check_phone_number(value: Option<&str>, errors: &mut Vec<FieldError>) -> Option<String> {
    let phone = required(value, Field::PhoneNumber, errors)?;
    if !PHONE_PATTERN.is_match(&phone) {
        errors.push(FieldError::new(
            Field::PhoneNumber,
            "The phone_number field format is invalid.",
        ));
        return None;
    }
    Some(phone)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, email: &str, phone: &str) -> RawRow {
        vec![
            ("company_name".to_string(), name.to_string()),
            ("email".to_string(), email.to_string()),
            ("phone_number".to_string(), phone.to_string()),
        ]
        .into_iter()
        .collect()
    }

    fn failing_fields(result: Result<ValidatedContact, Vec<FieldError>>) -> Vec<Field> {
        result.unwrap_err().into_iter().map(|e| e.field).collect()
    }

    #[test]
    fn accepts_a_well_formed_row() {
        let contact = validate(&row("Alpha Tech", "alpha@example.com", "1234567")).unwrap();
        assert_eq!(contact.company_name, "Alpha Tech");
        assert_eq!(contact.email, "alpha@example.com");
        assert_eq!(contact.phone_number, "1234567");
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let contact = validate(&row("  Alpha ", " a@x.com ", " 1234567 ")).unwrap();
        assert_eq!(contact.company_name, "Alpha");
        assert_eq!(contact.email, "a@x.com");
        assert_eq!(contact.phone_number, "1234567");
    }

    #[test]
    fn reports_every_failing_rule() {
        let fields = failing_fields(validate(&row("Bad", "not-an-email", "abc")));
        assert_eq!(fields, vec![Field::Email, Field::PhoneNumber]);

        let fields = failing_fields(validate(&row("", "", "")));
        assert_eq!(
            fields,
            vec![Field::CompanyName, Field::Email, Field::PhoneNumber]
        );
    }

    #[test]
    fn whitespace_only_name_is_missing() {
        let errors = validate(&row("   ", "a@x.com", "1234567")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, Field::CompanyName);
        assert_eq!(errors[0].message, "The company_name field is required.");
    }

    #[test]
    fn company_name_length_limit() {
        let at_limit = "a".repeat(MAX_COMPANY_NAME_LENGTH);
        assert!(validate(&row(&at_limit, "a@x.com", "1234567")).is_ok());

        let over = "a".repeat(MAX_COMPANY_NAME_LENGTH + 1);
        assert_eq!(
            failing_fields(validate(&row(&over, "a@x.com", "1234567"))),
            vec![Field::CompanyName]
        );

        // Counted in characters, not bytes
        let multibyte = "é".repeat(MAX_COMPANY_NAME_LENGTH);
        assert!(validate(&row(&multibyte, "a@x.com", "1234567")).is_ok());
    }

    #[test]
    fn phone_number_length_boundaries() {
        assert!(validate(&row("A", "a@x.com", "1234567")).is_ok());
        assert!(validate(&row("A", "a@x.com", "123456789012345")).is_ok());

        for phone in ["123456", "1234567890123456", "12345a7", "+1234567", "123 4567"] {
            assert_eq!(
                failing_fields(validate(&row("A", "a@x.com", phone))),
                vec![Field::PhoneNumber],
                "{phone} should be rejected"
            );
        }
    }

    #[test]
    fn email_syntax() {
        for email in [
            "a@x.com",
            "first.last@example.co.uk",
            "user+tag@sub-domain.example.org",
            "admin@localhost",
        ] {
            assert!(
                validate(&row("A", email, "1234567")).is_ok(),
                "{email} should be accepted"
            );
        }

        for email in [
            "invalid-email",
            "@example.com",
            "user@",
            "user@@example.com",
            "user name@example.com",
            "user@-example.com",
            ".user@example.com",
            "user..name@example.com",
        ] {
            assert_eq!(
                failing_fields(validate(&row("A", email, "1234567"))),
                vec![Field::Email],
                "{email} should be rejected"
            );
        }
    }

    #[test]
    fn missing_columns_fail_as_required() {
        let partial: RawRow = vec![("company_name".to_string(), "Alpha".to_string())]
            .into_iter()
            .collect();
        assert_eq!(
            failing_fields(validate(&partial)),
            vec![Field::Email, Field::PhoneNumber]
        );
    }
}

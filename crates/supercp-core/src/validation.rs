//! Input checks run before any side effect

use crate::error::ValidationError;

type Check = Result<(), ValidationError>;

/// Hostname: dot-separated labels of `[a-z0-9-]`, no leading or trailing
/// hyphen, at most 63 chars each, final label at least two alphanumerics
pub fn domain(field: &'static str, value: &str) -> Check {
    let invalid = || ValidationError::new(field, format!("invalid domain name: {value}"));

    if value.is_empty() || value.len() > 253 {
        return Err(invalid());
    }

    let labels: Vec<&str> = value.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid());
    }

    let (tld, rest) = labels.split_last().ok_or_else(invalid)?;
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }

    for label in rest {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid());
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid());
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid());
        }
    }

    Ok(())
}

/// Mailbox address: `local@domain` with a valid domain part
pub fn email(field: &'static str, value: &str) -> Check {
    let Some((local, host)) = value.split_once('@') else {
        return Err(ValidationError::new(field, format!("invalid email address: {value}")));
    };

    let local_ok = !local.is_empty()
        && local.len() <= 64
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));
    if !local_ok {
        return Err(ValidationError::new(field, format!("invalid email address: {value}")));
    }

    domain(field, host)
}

/// Identifier of `[A-Za-z0-9_-]` between 1 and `max` characters
pub fn identifier(field: &'static str, value: &str, max: usize) -> Check {
    if value.is_empty() || value.len() > max {
        return Err(ValidationError::new(
            field,
            format!("must be between 1 and {max} characters"),
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::new(
            field,
            "may only contain letters, digits, underscore and dash",
        ));
    }
    Ok(())
}

/// Absolute path of `[A-Za-z0-9/_.-]` with no `..` segment
pub fn absolute_path(field: &'static str, value: &str) -> Check {
    let chars_ok = value.len() > 1
        && value.starts_with('/')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'));
    if !chars_ok || value.split('/').any(|segment| segment == "..") {
        return Err(ValidationError::new(field, format!("invalid path: {value}")));
    }
    Ok(())
}

/// Non-empty secret of at least `min` characters
pub fn password(field: &'static str, value: &str, min: usize) -> Check {
    if value.chars().count() < min {
        return Err(ValidationError::new(
            field,
            format!("must be at least {min} characters"),
        ));
    }
    Ok(())
}

/// Crontab schedule: five fields of `[0-9*/,-]` or one of the `@` macros
pub fn cron_schedule(field: &'static str, value: &str) -> Check {
    const MACROS: [&str; 8] = [
        "@reboot", "@yearly", "@annually", "@monthly", "@weekly", "@daily", "@midnight", "@hourly",
    ];
    let value = value.trim();
    if value.starts_with('@') {
        if MACROS.contains(&value) {
            return Ok(());
        }
        return Err(ValidationError::new(field, format!("unknown schedule macro: {value}")));
    }

    let fields: Vec<&str> = value.split_whitespace().collect();
    let fields_ok = fields.len() == 5
        && fields.iter().all(|f| {
            f.chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | ',' | '-'))
        });
    if !fields_ok {
        return Err(ValidationError::new(
            field,
            format!("must be five cron fields or an @ macro: {value}"),
        ));
    }
    Ok(())
}

/// Single-line text of at most `max` characters
pub fn single_line(field: &'static str, value: &str, max: usize) -> Check {
    required(field, value)?;
    if value.len() > max {
        return Err(ValidationError::new(field, format!("must be at most {max} characters")));
    }
    if value.contains(['\n', '\r']) {
        return Err(ValidationError::new(field, "must be a single line"));
    }
    Ok(())
}

/// Wall-clock time as `HH:MM`
pub fn clock_time(field: &'static str, value: &str) -> Check {
    let parsed = value.split_once(':').and_then(|(h, m)| {
        let ok = h.len() == 2 && m.len() == 2;
        Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)).filter(|_| ok)
    });
    match parsed {
        Some((h, m)) if h < 24 && m < 60 => Ok(()),
        _ => Err(ValidationError::new(field, format!("must be HH:MM: {value}"))),
    }
}

/// Non-empty free text
pub fn required(field: &'static str, value: &str) -> Check {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "is required"));
    }
    Ok(())
}

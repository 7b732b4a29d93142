use std::env;
use std::sync::OnceLock;

static FU_BALANCE_THRESHOLD: OnceLock<Option<f64>> = OnceLock::new();
static FU_BALANCE_MAX_ITERS: OnceLock<Option<usize>> = OnceLock::new();
static FU_BALANCE_VERIFY: OnceLock<bool> = OnceLock::new();
static FU_BALANCE_PROFILE: OnceLock<Option<String>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// `none`/`inf` mean no bound; negative or non-numeric values are ignored.
fn parse_threshold(value: &str) -> Option<f64> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" | "none" | "inf" | "unbounded" => None,
        other => other.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn threshold_override() -> Option<f64> {
    *FU_BALANCE_THRESHOLD.get_or_init(|| {
        non_empty_var("FU_BALANCE_THRESHOLD").and_then(|value| parse_threshold(&value))
    })
}

pub(crate) fn max_iterations_override() -> Option<usize> {
    *FU_BALANCE_MAX_ITERS.get_or_init(|| {
        non_empty_var("FU_BALANCE_MAX_ITERS").and_then(|value| value.trim().parse().ok())
    })
}

pub(crate) fn verify_enabled() -> bool {
    *FU_BALANCE_VERIFY.get_or_init(|| match non_empty_var("FU_BALANCE_VERIFY") {
        Some(value) => parse_bool(&value),
        None => false,
    })
}

/// Architecture name selected through `FU_BALANCE_PROFILE`.
pub fn profile_override() -> Option<&'static str> {
    FU_BALANCE_PROFILE
        .get_or_init(|| non_empty_var("FU_BALANCE_PROFILE").map(|value| value.trim().to_string()))
        .as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_parsing() {
        assert_eq!(parse_threshold("2.5"), Some(2.5));
        assert_eq!(parse_threshold(" INF "), None);
        assert_eq!(parse_threshold("-1"), None);
        assert_eq!(parse_threshold("fast"), None);
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("On"));
        assert!(!parse_bool("0"));
    }
}

pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Verifies a condition on decoded input data, failing with
/// `MalformedPbf` when it does not hold. `$name` is a `Display` value
/// naming the offending object (e.g. `format_args!("way {id}")`), so
/// fatal messages carry the OSM id.
#[macro_export]
macro_rules! verify_data {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_data(result, &$name, stringify!($expr))?;
    }};
}

pub fn verify_data(
    predicate: bool,
    name: &dyn std::fmt::Display,
    condition: &str,
) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        Err(crate::error::ErrorKind::MalformedPbf {
            message: format!("{name}: failed {condition}"),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::Result;

    fn check(id: u64) -> Result<()> {
        crate::verify_data!(format_args!("way {id}"), id < 100);
        Ok(())
    }

    #[test]
    fn test_verify_data_names_the_object() {
        assert!(check(7).is_ok());
        let err = check(140).unwrap_err();
        assert_eq!(err.to_string(), "malformed pbf: way 140: failed id < 100");
    }
}

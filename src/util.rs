/// Renders raw protocol bytes for logging, escaping anything non-printable.
pub fn bytes_to_human_str(input: &[u8]) -> String {
    input.escape_ascii().to_string()
}

/// Extracts the message from a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_human_str() {
        assert_eq!(bytes_to_human_str(b"stats"), "stats");
        assert_eq!(bytes_to_human_str(b"a\r\n\xff"), "a\\r\\n\\xff");
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload =
            std::panic::catch_unwind(|| panic!("job {} exploded", 7))
                .unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "job 7 exploded");
    }
}

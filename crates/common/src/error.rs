/// Error types that can be built from a plain message.
///
/// Implement this for a crate's `Error`, then invoke [`impl_context!`] in the
/// same module to get `.context()` and `.with_context()` on `Result` and
/// `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and
/// `.with_context()` on `Result` and `Option`.
///
/// The invoking module must define `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/scheduler/src/error.rs
/// autopilot_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    mod sample {
        use crate::FromMessage;

        #[derive(Debug, thiserror::Error)]
        #[error("{0}")]
        pub struct Error(pub String);

        impl FromMessage for Error {
            fn from_message(message: String) -> Self {
                Self(message)
            }
        }

        pub type Result<T> = std::result::Result<T, Error>;

        crate::impl_context!();
    }

    use sample::Context;

    #[test]
    fn test_result_context_prefixes_source() {
        let parsed: Result<u8, _> = "x".parse::<u8>();
        let err = parsed.context("reading retry limit").unwrap_err();
        assert_eq!(err.0, "reading retry limit: invalid digit found in string");
    }

    #[test]
    fn test_with_context_is_lazy_on_success() {
        let ok: Result<u8, std::num::ParseIntError> = Ok(3);
        let value = ok
            .with_context(|| -> String { panic!("context evaluated on success") })
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u8> = None;
        assert_eq!(missing.context("no agent").unwrap_err().0, "no agent");
        assert_eq!(Some(1).context("unused").unwrap(), 1);
    }
}

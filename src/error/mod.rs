//! The unified error handling system for the application.
//!
//! Cache Store operations never surface these errors to request handlers:
//! [`CacheError`] stays inside the backend and is flattened to a miss / `false`
//! at the store boundary. [`AppError`] is what startup, configuration and the
//! admin API propagate.

// 1. Core Types
pub use cache::CacheError;
pub use types::AppError;

/// A unified `Result` type for the entire application.
pub type Result<T> = std::result::Result<T, AppError>;

// 2. Module declarations
pub mod cache;
pub mod macros;
pub mod types;

// 3. Context Trait for adding context to errors.
pub trait Context<T, E> {
    /// Wrap the error with a static context message.
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display;

    /// Wrap the error with a lazily built context message.
    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display,
    {
        self.with_context(|| context)
    }

    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => {
                let context_message = context().to_string();
                Err(AppError::Context {
                    context: context_message,
                    source: Box::new(error.into()),
                })
            }
        }
    }
}

//! Error types for wrapped calls.
//!
//! The admission and reporting primitives are infallible. These errors only
//! surface from [`crate::CircuitBreaker::call`] and its async twin.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::state::State;

/// Result type for calls made through a circuit breaker.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error type for calls made through a circuit breaker.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open, the call was not attempted.
    Open,

    /// The circuit is half-open and every probe slot is taken.
    HalfOpenSaturated,

    /// The call was attempted and failed.
    Operation(E),
}

impl<E> BreakerError<E> {
    /// True if the breaker refused to run the call.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Operation(_))
    }

    /// Returns the operation error, if the call was attempted.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn rejected_in(state: State) -> Self {
        match state {
            State::HalfOpen => BreakerError::HalfOpenSaturated,
            State::Open | State::Closed => BreakerError::Open,
        }
    }
}

impl<E> Display for BreakerError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open => write!(f, "Circuit breaker is open"),
            BreakerError::HalfOpenSaturated => {
                write!(f, "Circuit breaker is half-open and all probe slots are in use")
            }
            BreakerError::Operation(e) => write!(f, "Operation error: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Open | BreakerError::HalfOpenSaturated => None,
            BreakerError::Operation(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl Display for Boom {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl Error for Boom {}

    #[test]
    fn rejection_kinds() {
        assert!(BreakerError::<Boom>::Open.is_rejection());
        assert!(BreakerError::<Boom>::HalfOpenSaturated.is_rejection());
        assert!(!BreakerError::Operation(Boom).is_rejection());
        assert!(matches!(
            BreakerError::<Boom>::rejected_in(State::HalfOpen),
            BreakerError::HalfOpenSaturated
        ));
        assert!(matches!(
            BreakerError::<Boom>::rejected_in(State::Open),
            BreakerError::Open
        ));
    }

    #[test]
    fn operation_error_is_source() {
        let err = BreakerError::Operation(Boom);
        assert_eq!(err.to_string(), "Operation error: boom");
        assert!(err.source().is_some());
        assert!(BreakerError::<Boom>::Open.source().is_none());
        assert!(err.into_operation().is_some());
    }
}

use std::fmt::{Debug, Display};

/// Log the error side of a result that is not worth propagating
pub trait OrLog {
    fn or_log(&self, context: impl Display);

    fn or_warn(&self, context: impl Display);
}

impl<T, E: Debug> OrLog for Result<T, E> {
    fn or_log(&self, context: impl Display) {
        if let Err(e) = &self {
            tracing::error!("Error: {:?} ({})", e, context);
        }
    }

    fn or_warn(&self, context: impl Display) {
        if let Err(e) = &self {
            tracing::warn!("{:?} ({})", e, context);
        }
    }
}

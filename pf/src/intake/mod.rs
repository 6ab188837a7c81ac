//! Intake Normalizer
//!
//! Turns a raw discovery or direct request into a canonical `ProjectSpec`.
//! Every field is checked and all violations are reported together.

mod errors;
mod normalizer;

pub use errors::{FieldError, FieldErrorCode, ValidationErrors};
pub use normalizer::{
    IntakeRequest, MAX_NAME_LEN, MAX_OVERVIEW_LEN, MIN_NAME_LEN, MIN_OVERVIEW_LEN, SUPPORTED_LANGUAGES, normalize,
};

pub mod batch_writer;
pub mod dates;
pub mod error;
pub mod i18n;

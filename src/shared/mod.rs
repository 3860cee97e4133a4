//! Types shared between the OCR core and the command line front end

pub mod messages;

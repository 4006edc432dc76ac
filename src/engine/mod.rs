//! Core engine: the scan → estimate → trade loop and its bookkeeping.

pub mod accountant;
pub mod lifecycle;
pub mod scanner;

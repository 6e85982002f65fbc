mod common;
#[cfg(unix)]
mod engine_tests;
mod profile_tests;
mod recipe_tests;
mod source_tests;

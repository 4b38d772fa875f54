mod buffer_tests;
mod helpers;
mod record_tests;

mod batch_tests;
mod helpers;

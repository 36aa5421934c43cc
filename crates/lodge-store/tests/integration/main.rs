mod common;
mod crawl_tests;
mod sink_tests;

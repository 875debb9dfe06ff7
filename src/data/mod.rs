pub mod browser;
pub mod extractor;
pub mod navigator;
pub mod types;
pub mod webdriver;

#[cfg(test)]
pub mod testing;

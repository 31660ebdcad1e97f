pub mod auth;
#[cfg(test)]
pub mod test_utils;
pub mod url;

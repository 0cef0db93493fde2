//! Browser access: the `PageDriver` seam, its WebDriver implementation, and
//! the shared `Session` every task reads the page through.

pub mod page;
pub mod selectors;
pub mod session;
pub mod webdriver;

#[cfg(test)]
pub mod fake;

pub use page::{Connector, Element, PageDriver};
pub use session::{Session, Tab, Turn};

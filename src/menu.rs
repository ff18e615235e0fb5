use std::io;

/// Interactive prompts the navigator needs from a front end.
///
/// `Ok(None)` means the user backed out. Errors are terminal failures.
pub trait Menu {
    fn select_one(&mut self, label: &str, items: &[String]) -> io::Result<Option<usize>>;

    /// Several items at once, in list order. An empty pick is `Some(vec![])`.
    fn select_many(&mut self, label: &str, items: &[String]) -> io::Result<Option<Vec<usize>>>;

    fn prompt(&mut self, label: &str) -> io::Result<Option<String>>;

    /// Shows a message and waits for acknowledgement.
    fn notify(&mut self, message: &str) -> io::Result<()>;

    /// Shows a message without waiting, e.g. while a request runs.
    fn show_status(&mut self, message: &str) -> io::Result<()>;
}

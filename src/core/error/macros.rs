//! Internal error handling macros.

/// Displays a system error message and aborts the program.
///
/// Use this for unrecoverable errors that indicate bugs in the container
/// implementation itself. The program prints a diagnostic message and
/// immediately aborts without unwinding.
///
/// # Examples
///
/// ```ignore
/// let Some(slot) = slots.slot(index) else {
///   fatal!("fresh slot array shorter than its target index");
/// };
/// ```
macro_rules! fatal {
  ($error:expr) => {{
    ::std::eprintln!(
      "{}:{}: a container invariant has been broken: {}",
      ::std::file!(),
      ::std::line!(),
      $error,
    );

    ::std::process::abort();
  }};
}

pub(crate) use fatal;

pub mod progress;

pub fn stdout_is_pipe() -> bool {
    !atty::is(atty::Stream::Stdout)
}

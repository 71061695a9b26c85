/// Routes panic messages through tracing so they reach the configured log
/// sink before the default hook prints the backtrace.
pub fn install() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("thread panicked: {info}");
        default_hook(info);
    }));
}

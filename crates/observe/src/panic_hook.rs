/// Chains a panic hook that reports panics through tracing so they show up
/// in structured log collection before the default hook prints them.
pub fn install() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("thread panicked: {info}");
        default_hook(info);
    }));
}

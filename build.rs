fn main() {
    // Export the ESP-IDF build environment only when targeting the device.
    // Host builds (no "espidf" feature) have nothing to link against.
    if std::env::var_os("CARGO_FEATURE_ESPIDF").is_some() {
        embuild::espidf::sysenv::output();
    }
}

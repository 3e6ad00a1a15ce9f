fn main() {
    libsystemd::entrypoints::run_service_manager();
}

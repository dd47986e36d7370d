fn main() -> std::process::ExitCode {
    gesturemind_lib::run()
}

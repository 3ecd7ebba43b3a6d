fn main() {
    if !cfg!(unix) {
        panic!(
            "{} only works on unix-like systems (process control relies on POSIX signals)",
            env!("CARGO_PKG_NAME")
        );
    }
}

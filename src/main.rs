fn main() -> Result<(), Box<dyn std::error::Error>> {
    disa::cli::main()
}

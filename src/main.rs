fn main() -> Result<(), anyhow::Error> {
    haplopipe::run()
}

fn main() -> anyhow::Result<()> {
    recite_lib::run()
}

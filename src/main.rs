fn main() -> anyhow::Result<()> {
    tubediary_lib::run()
}

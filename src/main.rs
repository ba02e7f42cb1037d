fn main() -> anyhow::Result<()> {
    autoapply_lib::run()
}

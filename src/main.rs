fn main() -> anyhow::Result<()> {
    isinit::is::main()
}

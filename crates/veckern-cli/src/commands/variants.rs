use veckern::KernelOp;

pub fn run(op: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let ops = match op {
        Some(name) => vec![name.parse::<KernelOp>()?],
        None => KernelOp::ALL.to_vec(),
    };
    for op in ops {
        let tags: Vec<String> = op.variants().iter().map(|v| v.tag()).collect();
        println!("{:<20}{}", op.name(), tags.join(", "));
    }
    Ok(())
}

//! `chatloom tools`: list the built-in tools.

pub fn run() {
    let registry = chatloom_tools::default_registry();
    for def in registry.definitions() {
        println!("{}", def.name);
        println!("    {}", def.description);
        for param in &def.parameters {
            let marker = if param.required { " (required)" } else { "" };
            println!("    - {}{marker}: {}", param.name, param.description);
        }
    }
}

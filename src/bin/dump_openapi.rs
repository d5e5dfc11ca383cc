use std::fs;

fn main() -> anyhow::Result<()> {
    let doc = care_roster::docs::build_openapi(8000)?;
    let rendered = serde_json::to_string_pretty(&doc)?;
    let path = "/tmp/openapi-care-roster.json";
    fs::write(path, rendered)?;
    println!("wrote {}", path);
    Ok(())
}

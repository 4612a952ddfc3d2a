use grid_resilience::config::{CoreConfig, validator};

pub fn cmd_show_config(config: &CoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    // 密钥字段不参与序列化
    println!("{}", serde_yaml::to_string(config)?);

    match validator::validate(config) {
        Ok(()) => println!("✅ 配置有效"),
        Err(e) => println!("❌ 配置无效: {}", e),
    }

    let missing = validator::missing_secrets(config);
    if missing.is_empty() {
        println!("🔐 凭据已配置");
    } else {
        println!("⚠️  缺少凭据: {}", missing.join(", "));
    }
    Ok(())
}

use grid_resilience::ai::AnalysisRequest;
use grid_resilience::{Admission, CoreServices};

pub fn cmd_analyze(
    services: &CoreServices,
    prompt: &str,
    caller: Option<&str>,
    max_tokens: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = AnalysisRequest::new(prompt).with_max_tokens(max_tokens);

    match services.ai.analyze(caller, &request)? {
        Admission::Granted(response) => {
            println!("{}", response.text);
            eprintln!(
                "🤖 {} (输入 {} / 输出 {} tokens)",
                response.model, response.input_tokens, response.output_tokens
            );
        }
        Admission::Throttled { message, limits } => {
            println!("⏳ {}", message);
            println!(
                "   请求 {} 可用, 令牌 {} 可用, 今日 {}/{}",
                limits.global_requests_available,
                limits.global_tokens_available,
                limits.daily_requests_used,
                limits.daily_requests_limit
            );
        }
    }
    Ok(())
}

use anyhow::{Context, Result};
use cirrus_core::config::{Config, LocationConfig};
use console::style;
use dialoguer::{Input, Select};

const BANNER: &str = r"
    -------------------------------------

       ___ (_)_ __ _ __ _   _ ___
      / __|| | '__| '__| | | / __|
     | (__ | | |  | |  | |_| \__ \
      \___||_|_|  |_|   \__,_|___/

    -------------------------------------
";

struct ProviderChoice {
    name: &'static str,
    label: &'static str,
    key_hint: Option<&'static str>,
    models: &'static [&'static str],
}

const PROVIDERS: &[ProviderChoice] = &[
    ProviderChoice {
        name: "gemini",
        label: "Google Gemini",
        key_hint: Some("GEMINI_API_KEY"),
        models: &["gemini-2.0-flash", "gemini-2.5-flash", "gemini-2.5-pro"],
    },
    ProviderChoice {
        name: "openai",
        label: "OpenAI",
        key_hint: Some("OPENAI_API_KEY"),
        models: &["gpt-4o-mini", "gpt-4o", "gpt-4.1-mini"],
    },
    ProviderChoice {
        name: "openrouter",
        label: "OpenRouter",
        key_hint: Some("OPENROUTER_API_KEY"),
        models: &["google/gemini-2.0-flash-001", "openai/gpt-4o-mini"],
    },
    ProviderChoice {
        name: "ollama",
        label: "Ollama (local)",
        key_hint: None,
        models: &["llama3.2", "qwen3"],
    },
];

fn print_step(step: usize, total: usize, title: &str) {
    println!();
    println!(
        "{}",
        style(format!("[{}/{}] {}", step, total, title))
            .cyan()
            .bold()
    );
    println!();
}

fn setup_provider() -> Result<&'static ProviderChoice> {
    let labels: Vec<&str> = PROVIDERS.iter().map(|p| p.label).collect();

    let selection = Select::new()
        .with_prompt("Select your model provider")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to select provider")?;

    Ok(&PROVIDERS[selection])
}

fn setup_api_key(provider: &ProviderChoice) -> Result<String> {
    let Some(env_var) = provider.key_hint else {
        println!("  {} No API key needed", style("✓").green());
        return Ok(String::new());
    };

    let api_key: String = Input::new()
        .with_prompt(format!(
            "Enter your {} API key (leave empty to use {})",
            provider.label, env_var
        ))
        .allow_empty(true)
        .interact_text()
        .context("Failed to read API key")?;

    if api_key.is_empty() && std::env::var(env_var).is_err() {
        return Err(anyhow::anyhow!(
            "API key cannot be empty unless {} is set",
            env_var
        ));
    }

    Ok(api_key)
}

fn setup_model(provider: &ProviderChoice) -> Result<String> {
    let selection = Select::new()
        .with_prompt("Select your model")
        .items(provider.models)
        .default(0)
        .interact()
        .context("Failed to select model")?;

    Ok(provider.models[selection].to_string())
}

fn setup_location() -> Result<LocationConfig> {
    let default = LocationConfig::default();

    let city: String = Input::new()
        .with_prompt("Home city")
        .default(default.city.clone())
        .interact_text()
        .context("Failed to read city")?;

    if city == default.city {
        return Ok(default);
    }

    let latitude: f64 = Input::new()
        .with_prompt("Latitude")
        .validate_with(|v: &f64| {
            if (-90.0..=90.0).contains(v) {
                Ok(())
            } else {
                Err("latitude must be between -90 and 90")
            }
        })
        .interact_text()
        .context("Failed to read latitude")?;

    let longitude: f64 = Input::new()
        .with_prompt("Longitude")
        .validate_with(|v: &f64| {
            if (-180.0..=180.0).contains(v) {
                Ok(())
            } else {
                Err("longitude must be between -180 and 180")
            }
        })
        .interact_text()
        .context("Failed to read longitude")?;

    Ok(LocationConfig {
        city,
        latitude,
        longitude,
    })
}

pub fn run_onboard() -> Result<Config> {
    println!("{}", style(BANNER).cyan().bold());

    println!("  {}", style("Welcome to cirrus!").white().bold());
    println!(
        "  {}",
        style("This wizard will configure your weather assistant.").dim()
    );
    println!();

    print_step(1, 4, "Provider");
    let provider = setup_provider()?;

    print_step(2, 4, "API Key Setup");
    let api_key = setup_api_key(provider)?;

    print_step(3, 4, "Model Selection");
    let model = setup_model(provider)?;

    print_step(4, 4, "Home Location");
    let location = setup_location()?;

    let config = Config {
        provider: Some(provider.name.to_string()),
        api_key,
        model,
        location,
        ..Default::default()
    };

    println!();
    println!("  {} Configuration complete!", style("✓").green().bold());
    println!(
        "  {} Config saved to {}",
        style("→").green(),
        style(cirrus_core::config::get_config_path().display()).cyan()
    );
    println!();
    println!(
        "  {} You can now run: {} or {}",
        style("→").green(),
        style("cirrus chat").cyan().bold(),
        style("cirrus serve").cyan().bold()
    );
    println!();

    Ok(config)
}

use std::env;

use log::info;
use pomma_core::config::FitConfig;
use pomma_core::io::{build_output_path, read_sequences};
use pomma_core::pomma::{FittedPomma, PommaFitter};

// Usage: pomma-exemple [corpus.txt] [config.json]
// Without arguments a small built-in corpus is used.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let corpus_path = args.next();
    let config_path = args.next();

    // One sequence per line, one symbol per character
    let corpus: Vec<Vec<char>> = match &corpus_path {
        Some(path) => read_sequences(path)?,
        None => ["aabc", "aaaabc", "aabc"].iter().map(|line| line.chars().collect()).collect(),
    };

    // Missing keys in the JSON file take their default value
    let config = match &config_path {
        Some(path) => FitConfig::from_json_file(path)?,
        None => FitConfig::builder().max_extra_states(3).num_random_starts(4).seed(42).build()?,
    };

    // Reuse the cached model next to the corpus if there is one
    let cache = match &corpus_path {
        Some(path) => Some(build_output_path(path, "bin")?),
        None => None,
    };
    let fitted: FittedPomma<char> = match &cache {
        Some(path) if path.exists() => {
            info!("Loading cached model from {}", path.display());
            FittedPomma::load(path)?
        }
        _ => PommaFitter::new(config).fit(&corpus)?,
    };

    for score in fitted.scores() {
        println!(
            "{} extra states: log-likelihood {:.3}, BIC {:.3}, converged {}",
            score.extra_states, score.log_likelihood, score.bic, score.converged
        );
    }
    println!(
        "Selected {} extra states, {} states after pruning",
        fitted.extra_states(),
        fitted.model().len()
    );

    // Per-state labels: sentinels for start and end, mapped symbols otherwise
    println!("State labels: {:?}", fitted.model().state_symbols());

    if let Some(path) = &cache {
        if !path.exists() {
            fitted.save(path)?;
            println!("Model saved to {}", path.display());
        }
    }

    // Generate 10 sequences with a fixed seed
    for (i, sequence) in fitted.generate(10, 7)?.iter().enumerate() {
        println!("Generated sequence {}: {}", i + 1, sequence.iter().collect::<String>());
    }

    Ok(())
}

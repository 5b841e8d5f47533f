//! Interface de terminal do scriptorium: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso por seção e `console`
//! para estilização com cores. O [`GenerationProgress`] acompanha visualmente
//! os eventos de um job no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use scriptorium::cost::CostEstimate;
use scriptorium::generation::AttemptBudget;
use scriptorium::job::{JobState, JobStatus};
use scriptorium::progress::ProgressEvent;

/// Indicador visual de progresso para a geração de um documento.
///
/// A barra avança uma unidade por seção aceita. Seções concluídas são
/// impressas acima da barra; falhas aparecem em vermelho.
pub struct GenerationProgress {
    // Barra criada ao receber o evento `start`.
    pb: Option<ProgressBar>,
    green: Style,
    red: Style,
    dim: Style,
}

impl Default for GenerationProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationProgress {
    pub fn new() -> Self {
        Self {
            pb: None,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Atualiza a barra a partir de um evento de progresso.
    pub fn handle(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Start { total_sections } => {
                let pb = ProgressBar::new(*total_sections as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                pb.enable_steady_tick(std::time::Duration::from_millis(100));
                self.pb = Some(pb);
            }
            ProgressEvent::Progress { title, percent, .. } => {
                if let Some(pb) = &self.pb {
                    pb.set_message(format!("{title} ({percent}%)"));
                }
            }
            ProgressEvent::Section {
                index,
                title,
                payload,
            } => {
                if let Some(pb) = &self.pb {
                    pb.println(format!(
                        "  {} {}. {title} {}",
                        self.green.apply_to("✓"),
                        index + 1,
                        self.dim.apply_to(format!(
                            "[{}, {} attempt(s), {} tokens]",
                            payload.model,
                            payload.attempts,
                            payload.usage.total()
                        ))
                    ));
                    pb.inc(1);
                }
            }
            ProgressEvent::Error { index, message, .. } => {
                self.clear();
                println!(
                    "  {} section {} failed: {message}",
                    self.red.apply_to("✗"),
                    index + 1
                );
            }
            ProgressEvent::Complete { .. } => self.clear(),
        }
    }

    fn clear(&mut self) {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
    }

    /// Exibe o estado final do job.
    pub fn finish(&mut self, status: &JobStatus) {
        self.clear();
        match (&status.state, &status.error) {
            (JobState::Completed, _) => {
                println!("  {} Job {} completed", self.green.apply_to("✓"), status.id);
            }
            (_, Some(failure)) => {
                println!("  {} Job {} failed: {failure}", self.red.apply_to("✗"), status.id);
            }
            (state, None) => {
                println!("  Job {} is {state} ({}%)", status.id, status.progress);
            }
        }
    }
}

/// Imprime a estimativa de custo e o limite de chamadas por seção.
pub fn print_estimate(estimate: &CostEstimate, budget: &AttemptBudget) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("─── Cost Estimate ───"));
    println!("  sections:        {}", estimate.sections);
    println!("  input tokens:    {}", estimate.input_tokens);
    println!("  output tokens:   {}", estimate.output_tokens);
    println!("  expected cost:   ${:.4}", estimate.expected_usd);
    println!("  worst case cost: ${:.4}", estimate.worst_case_usd);
    println!(
        "  max provider calls per section: {} ({} quality attempts × {} models × {} tries)",
        budget.max_provider_calls_per_section(),
        budget.max_regenerations + 1,
        budget.chain_len,
        budget.max_retries + 1
    );
}

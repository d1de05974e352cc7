use crate::models::{ContextDoc, NormalizedSession};

/// Render a context document as Markdown with the fixed section layout.
///
/// Sections with empty bodies are omitted entirely, heading included. Raw
/// conversation content never appears here; only the enrichment's summarized
/// fields do.
pub fn render_document(doc: &ContextDoc, session: &NormalizedSession) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str(&format!("# Session: {}\n\n", doc.title));
    out.push_str("**Source**: claude-code\n");
    out.push_str(&format!("**Project**: {}\n", session.project));
    if let Some(branch) = session.git_branch.as_deref().filter(|b| !b.is_empty()) {
        out.push_str(&format!("**Branch**: {branch}\n"));
    }

    if !doc.prompts_and_intent.trim().is_empty() {
        out.push_str("\n## Prompts & Intent\n");
        out.push_str(doc.prompts_and_intent.trim());
        out.push('\n');
    }

    if !doc.key_decisions.is_empty() {
        out.push_str("\n## Key Decisions\n");
        for decision in &doc.key_decisions {
            out.push_str(&format!("### {}\n{}\n", decision.title, decision.reasoning));
        }
    }

    if !doc.problems_solved.is_empty() {
        out.push_str("\n## Problems Solved\n");
        for problem in &doc.problems_solved {
            out.push_str(&format!("- {problem}\n"));
        }
    }

    if !doc.insights.is_empty() {
        out.push_str("\n## Insights\n");
        for insight in &doc.insights {
            out.push_str(&format!("- {insight}\n"));
        }
    }

    out
}

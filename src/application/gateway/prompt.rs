/// Styling brief sent as the system message for every provider.
pub(crate) const SYSTEM_INSTRUCTION: &str = r#"You format raw study material into polished, consistent study notes with a dark theme.
Convert the user's text into a single self-contained HTML <article> element styled only with Tailwind CSS classes.
Every set of notes must look as if the same careful author wrote it.

Palette: page bg-zinc-900, text text-zinc-300, accent (headings, links) text-orange-400,
code backgrounds bg-zinc-950 or bg-zinc-800, borders border-zinc-700 or border-orange-400/30.
Fonts: font-sans for body text, font-serif for headings.

Root element: <article class="p-8 md:p-12 bg-zinc-900 text-zinc-300 max-w-4xl mx-auto font-sans leading-relaxed">.
Elements:
- h1: font-serif text-4xl font-bold text-orange-400 mb-6 pb-2 border-b-2 border-orange-400/30
- h2: font-serif text-3xl font-semibold text-zinc-100 mt-8 mb-4 pb-2 border-b border-zinc-700
- h3: font-serif text-xl font-semibold text-zinc-100 mt-6 mb-3
- p: mb-4 text-zinc-300
- a: text-orange-400 hover:underline
- ul: list-disc list-inside mb-4 pl-4 space-y-2
- ol: list-decimal list-inside mb-4 pl-4 space-y-2
- blockquote: border-l-4 border-orange-400 bg-zinc-800 p-4 my-6 rounded-r-lg italic text-zinc-400
- inline code: bg-zinc-700 text-zinc-200 font-mono text-sm px-1.5 py-1 rounded
- pre: bg-zinc-950 border border-zinc-800 text-zinc-300 p-4 rounded-lg overflow-x-auto my-6, always containing <code>

Math: keep LaTeX exactly as written. Inline math stays as $...$ inside a <span>, for example <span>$E=mc^2$</span>.
Block math stays as $$...$$ inside a <div>. Never convert math to MathML or images.

Diagrams: put Mermaid source in <pre class="mermaid">, for example <pre class="mermaid">graph TD; A-->B;</pre>.
Use only standard Mermaid syntax (flowchart, sequenceDiagram, gantt, classDiagram, stateDiagram-v2, pie,
gitGraph, journey, C4Context) and never wrap the source in markdown fences.

Output only the <article> and its contents: no <!DOCTYPE>, <html>, <head>, <body> or <style> tags."#;

pub(crate) fn user_message(text: &str) -> String {
    format!("Here is the user's text to convert:\n---\n{text}\n---")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_text_between_rules() {
        assert_eq!(
            user_message("Entropia"),
            "Here is the user's text to convert:\n---\nEntropia\n---"
        );
    }

    #[test]
    fn instruction_names_both_markers() {
        assert!(SYSTEM_INSTRUCTION.contains("<pre class=\"mermaid\">"));
        assert!(SYSTEM_INSTRUCTION.contains("$$...$$"));
    }
}

//! Grouping retrieved chunks by source and assembling the cited context block.
//!
//! Citation numbers are positions in the source list (1-based), and the source
//! list preserves the order in which each `source_url` first appeared in the
//! index results. That ordering is kept explicitly with a `Vec` plus a
//! position lookup rather than relying on map iteration order.

use std::collections::HashMap;

use crate::models::{Chunk, Citation, Source};

/// Group chunks by `source_url` in first-seen order
pub fn aggregate_sources(chunks: Vec<Chunk>) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for chunk in chunks {
        match positions.get(&chunk.source_url) {
            Some(&i) => sources[i].chunks.push(chunk),
            None => {
                positions.insert(chunk.source_url.clone(), sources.len());
                sources.push(Source {
                    source_url: chunk.source_url.clone(),
                    source_description: chunk.source_description.clone(),
                    chunks: vec![chunk],
                });
            }
        }
    }
    sources
}

/// Sort a source's chunks by `order`; ties keep retrieval order
pub fn sort_chunks_by_order(source: &mut Source) {
    source.chunks.sort_by_key(|c| c.order);
}

/// Aggregate then sort: the sources used for context and citations
pub fn sources_from_chunks(chunks: Vec<Chunk>) -> Vec<Source> {
    let mut sources = aggregate_sources(chunks);
    sources.iter_mut().for_each(sort_chunks_by_order);
    sources
}

/// Stitch ordered chunks into one excerpt, tagging each with `[n]`.
/// A chunk's `post_context` is dropped when it equals the next chunk's
/// `pre_context`, which the next chunk will emit anyway.
pub fn build_context_from_ordered_chunks(chunks: &[Chunk], citation_number: usize) -> String {
    let mut context = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let next = chunks.get(i + 1);

        context.push_str(&chunk.pre_context);
        context.push(' ');
        context.push_str(&chunk.text);
        context.push_str(&format!(" [{citation_number}] "));
        if next.is_none_or(|n| n.pre_context != chunk.post_context) {
            context.push_str(&chunk.post_context);
        }
        if next.is_some() {
            context.push_str("\n\n");
        }
    }
    context.trim().to_string()
}

pub fn context_from_source(source: &Source, citation_number: usize) -> String {
    format!(
        "<excerpt>\nSource Description: {description}\nSource Citation: [{n}]\nExcerpt from Source [{n}]:\n{body}\n</excerpt>",
        description = source.source_description,
        n = citation_number,
        body = build_context_from_ordered_chunks(&source.chunks, citation_number),
    )
}

/// One excerpt block per source, numbered from 1
pub fn context_from_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| context_from_source(source, i + 1))
        .collect::<Vec<_>>()
        .join("\n\n\n")
}

/// One citation per source, in citation-number order
pub fn citations_from_sources(sources: &[Source]) -> Vec<Citation> {
    sources.iter().map(Citation::from).collect()
}

/// Remove `[n]` citation markers from generated text
pub fn strip_citations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let (before, from_open) = rest.split_at(open);
        out.push_str(before);
        let digits = from_open[1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .count();
        if digits > 0 && from_open[1 + digits..].starts_with(']') {
            rest = &from_open[digits + 2..];
        } else {
            out.push('[');
            rest = &from_open[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Length of `text` minus a trailing citation marker that is still arriving,
/// such as `[` or `[12`
pub fn settled_len(text: &str) -> usize {
    match text.rfind('[') {
        Some(open) if text[open + 1..].bytes().all(|b| b.is_ascii_digit()) => open,
        _ => text.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source_url: &str, order: i64, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source_url: source_url.to_string(),
            source_description: format!("{source_url} description"),
            order,
            ..Default::default()
        }
    }

    #[test]
    fn test_citations_follow_first_appearance() {
        let sources = sources_from_chunks(vec![
            chunk("B", 1, "b1"),
            chunk("A", 1, "a1"),
            chunk("B", 2, "b2"),
            chunk("C", 1, "c1"),
        ]);
        let urls: Vec<_> = citations_from_sources(&sources)
            .into_iter()
            .map(|c| c.source_url)
            .collect();
        assert_eq!(urls, ["B", "A", "C"]);

        let context = context_from_sources(&sources);
        let b = context.find("Source Citation: [1]").expect("B block");
        let a = context.find("Source Citation: [2]").expect("A block");
        let c = context.find("Source Citation: [3]").expect("C block");
        assert!(b < a && a < c);
        assert!(context.contains("b1 [1]"));
        assert!(context.contains("a1 [2]"));
        assert!(context.contains("c1 [3]"));
    }

    #[test]
    fn test_chunks_sorted_within_source_share_citation() {
        let sources = sources_from_chunks(vec![chunk("A", 2, "b"), chunk("A", 1, "a")]);
        assert_eq!(sources.len(), 1);
        let context = context_from_sources(&sources);
        let a = context.find("a [1]").expect("a-derived text");
        let b = context.find("b [1]").expect("b-derived text");
        assert!(a < b);
        assert!(!context.contains("[2]"));
    }

    #[test]
    fn test_shared_boundary_text_is_not_duplicated() {
        let chunks = vec![
            Chunk {
                pre_context: "Intro.".into(),
                text: "First".into(),
                post_context: "Bridge.".into(),
                ..chunk("A", 1, "")
            },
            Chunk {
                pre_context: "Bridge.".into(),
                text: "Second".into(),
                post_context: "Outro.".into(),
                ..chunk("A", 2, "")
            },
        ];
        let context = build_context_from_ordered_chunks(&chunks, 1);
        assert_eq!(context, "Intro. First [1] \n\nBridge. Second [1] Outro.");
        assert_eq!(context.matches("Bridge.").count(), 1);
    }

    #[test]
    fn test_differing_boundaries_are_both_kept() {
        let chunks = vec![
            Chunk {
                text: "First".into(),
                post_context: "Tail one.".into(),
                ..chunk("A", 1, "")
            },
            Chunk {
                pre_context: "Head two.".into(),
                text: "Second".into(),
                ..chunk("A", 2, "")
            },
        ];
        let context = build_context_from_ordered_chunks(&chunks, 4);
        assert!(context.contains("Tail one."));
        assert!(context.contains("Head two."));
    }

    #[test]
    fn test_no_chunks_no_context() {
        let sources = sources_from_chunks(Vec::new());
        assert!(sources.is_empty());
        assert_eq!(context_from_sources(&sources), "");
        assert!(citations_from_sources(&sources).is_empty());
    }

    #[test]
    fn test_strip_citations_only_removes_numeric_markers() {
        assert_eq!(strip_citations("Paris [1] is big [12]."), "Paris  is big .");
        assert_eq!(strip_citations("arr[i] and [x] and [3"), "arr[i] and [x] and [3");
        assert_eq!(strip_citations("[]"), "[]");
    }

    #[test]
    fn test_unfinished_trailing_marker_is_not_settled() {
        assert_eq!(settled_len("Paris ["), 6);
        assert_eq!(settled_len("Paris [12"), 6);
        assert_eq!(settled_len("Paris [1]"), 9);
        assert_eq!(settled_len("arr[i"), 5);
        assert_eq!(settled_len("no markers"), 10);
    }
}

//! Randomized checks of fingerprint determinism and discrimination.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rollcall_forms::fingerprint::fingerprint;
use std::collections::HashSet;

const CASES: usize = 200;

const WORDS: &[&str] = &[
    "Ders", "Hafta", "Yoklama", "Lecture", "Week", "Quiz", "Lab", "Seminer", "Bölüm", "Grup",
];

const LABELS: &[&str] = &[
    "Full Name",
    "Student ID",
    "Email",
    "Section",
    "Ad Soyad",
    "Öğrenci No",
    "Comments",
];

#[derive(Debug, Clone)]
enum Node {
    Block(&'static str, Vec<Node>),
    Text,
    Input { kind: &'static str, name: String, label: &'static str },
}

fn random_tree(rng: &mut StdRng, depth: usize) -> Vec<Node> {
    let count = rng.gen_range(1..=4);
    (0..count)
        .map(|_| match rng.gen_range(0..3) {
            0 if depth < 3 => {
                let tag = *["div", "section", "fieldset"].choose(rng).unwrap_or(&"div");
                Node::Block(tag, random_tree(rng, depth + 1))
            }
            1 => Node::Text,
            _ => Node::Input {
                kind: *["text", "checkbox", "radio", "number"].choose(rng).unwrap_or(&"text"),
                name: format!("q{}", rng.gen_range(0..1000)),
                label: LABELS.choose(rng).copied().unwrap_or("Name"),
            },
        })
        .collect()
}

fn render(nodes: &[Node], rng: &mut StdRng, out: &mut String) {
    for node in nodes {
        match node {
            Node::Block(tag, children) => {
                out.push_str(&format!("<{tag}>"));
                render(children, rng, out);
                out.push_str(&format!("</{tag}>"));
            }
            Node::Text => {
                let words: Vec<&str> = (0..rng.gen_range(1..6))
                    .map(|_| *WORDS.choose(rng).unwrap_or(&"x"))
                    .collect();
                out.push_str(&format!("<p>{} {}</p>", words.join(" "), rng.gen::<u32>()));
            }
            Node::Input { kind, name, label } => {
                out.push_str(&format!(
                    r#"<label>{label} <input type="{kind}" name="{name}" value="{}"></label>"#,
                    rng.gen::<u16>()
                ));
            }
        }
    }
}

fn page(nodes: &[Node], rng: &mut StdRng) -> String {
    let mut body = String::new();
    render(nodes, rng, &mut body);
    format!(
        "<html><head><title>{}</title></head><body><form>{body}<button>Submit</button></form></body></html>",
        rng.gen::<u64>()
    )
}

/// Change one structural aspect of the tree.
fn perturb(nodes: &mut Vec<Node>, rng: &mut StdRng) {
    let index = rng.gen_range(0..nodes.len());
    match rng.gen_range(0..3) {
        0 => nodes.insert(
            index,
            Node::Input {
                kind: "text",
                name: "extra".to_string(),
                label: "Email",
            },
        ),
        1 => {
            let node = nodes.remove(index);
            nodes.insert(index, Node::Block("div", vec![node]));
        }
        _ => nodes.push(Node::Input {
            kind: "checkbox",
            name: format!("added{}", rng.gen::<u32>()),
            label: "Comments",
        }),
    }
}

#[test]
fn test_same_shape_same_fingerprint() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..CASES {
        let tree = random_tree(&mut rng, 0);
        let a = page(&tree, &mut rng);
        let b = page(&tree, &mut rng);
        assert_ne!(a, b, "renderings should differ in free text");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}

#[test]
fn test_perturbed_shape_new_fingerprint() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..CASES {
        let tree = random_tree(&mut rng, 0);
        let mut changed = tree.clone();
        perturb(&mut changed, &mut rng);

        let original = page(&tree, &mut rng);
        let perturbed = page(&changed, &mut rng);
        assert_ne!(fingerprint(&original), fingerprint(&perturbed));
    }
}

#[test]
fn test_distinct_trees_rarely_collide() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut seen = HashSet::new();
    let mut shapes = HashSet::new();
    for _ in 0..CASES {
        let tree = random_tree(&mut rng, 0);
        let html = page(&tree, &mut rng);
        shapes.insert(format!("{tree:?}"));
        seen.insert(fingerprint(&html));
    }
    // every distinct shape maps to a distinct fingerprint
    assert_eq!(seen.len(), shapes.len());
}

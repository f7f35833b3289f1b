use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gradegate::extractor::{ExtractRequest, KeywordExtractor};
use gradegate::guardrails::{
    policy_pack::PolicyRule, GuardrailChain, GuardrailConfig, PreContext, DEFAULT_ORDER,
};
use gradegate::model::Role;

const MESSAGES: &[(&str, Role)] = &[
    ("Quero ver as minhas notas de Matemática do módulo 2", Role::Student),
    ("Mostra as notas do João", Role::Student),
    ("Apagar a nota do Miguel", Role::Teacher),
    (
        "Adicionar nota 18,5 ao João em Matemática, turma 10A, módulo 1, teste 2",
        Role::Teacher,
    ),
    ("Relatório da turma 10A em Português", Role::Teacher),
];

fn chain_with_policies() -> GuardrailChain {
    let cfg = GuardrailConfig {
        policies: vec![PolicyRule {
            roles: vec![Role::Student],
            contains: vec!["exame nacional".into(), "pauta".into()],
            patterns: vec![r"\bcopiar\b.*\bteste\b".into()],
            reason: None,
        }],
        extractor: None,
    };
    let order: Vec<String> = DEFAULT_ORDER.iter().map(|s| s.to_string()).collect();
    GuardrailChain::new(&order, &cfg, 120)
}

fn bench_pre_check(c: &mut Criterion) {
    let chain = chain_with_policies();
    c.bench_function("pre_check_default_chain", |b| {
        b.iter(|| {
            for (msg, role) in MESSAGES {
                let ctx = PreContext::new(2, *role, msg);
                black_box(chain.check(&ctx));
            }
        })
    });
}

fn bench_keyword_extraction(c: &mut Criterion) {
    let extractor = KeywordExtractor;
    c.bench_function("keyword_extraction", |b| {
        b.iter(|| {
            for (msg, role) in MESSAGES {
                let req = ExtractRequest {
                    message: msg,
                    actor_id: 1,
                    role: *role,
                    name: "Ana",
                };
                black_box(extractor.extract_sync(&req));
            }
        })
    });
}

criterion_group!(benches, bench_pre_check, bench_keyword_extraction);
criterion_main!(benches);

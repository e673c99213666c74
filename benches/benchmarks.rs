use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lilygate::access::siwe::AuthorizationMessage;
use lilygate::access::types::ResourceAbilityRequest;
use lilygate::access::AccessCondition;
use k256::ecdsa::SigningKey;
use lilygate::chain::identity::{personal_sign_hash, recover_address};
use rand_core::OsRng;

fn sample_message() -> AuthorizationMessage {
    AuthorizationMessage {
        domain: "localhost".to_string(),
        address: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string(),
        uri: "lit:session:bench".to_string(),
        chain_id: 11_155_111,
        nonce: format!("0x{}", "ab".repeat(32)),
        issued_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        expiration: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
        resources: vec![ResourceAbilityRequest::decrypt_any()],
        network: "cayenne".to_string(),
    }
}

fn bench_authorization_message(c: &mut Criterion) {
    let message = sample_message();

    // Render once before benchmarking
    match message.to_message() {
        Ok(_) => {
            c.bench_function("authorization_message", |b| {
                b.iter(|| black_box(&message).to_message().unwrap())
            });
        }
        Err(e) => {
            panic!("Failed to render authorization message: {:?}", e);
        }
    }
}

fn bench_condition_hash(c: &mut Criterion) {
    let condition = AccessCondition::default_token_holder();
    c.bench_function("condition_hash", |b| {
        b.iter(|| black_box(&condition).condition_hash())
    });
}

fn bench_recover_address(c: &mut Criterion) {
    let key = SigningKey::random(&mut OsRng);
    let message = sample_message().to_message().unwrap();
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&personal_sign_hash(&message))
        .unwrap();
    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    let signature = format!("0x{}", hex::encode(bytes));

    c.bench_function("recover_address", |b| {
        b.iter(|| recover_address(black_box(&message), black_box(&signature)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_authorization_message,
    bench_condition_hash,
    bench_recover_address
);
criterion_main!(benches);

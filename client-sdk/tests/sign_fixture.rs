use bitcoin::consensus::deserialize;
use bitcoin::Transaction;
use serde::Deserialize;

use ledger_btc_client_sdk::replay::ReplayTransport;
use ledger_btc_client_sdk::{Config, LedgerBtcApp, SignedInput, SigningInput};

#[derive(Deserialize)]
struct Fixture {
    prev_txs: Vec<String>,
    tx: String,
    inputs: Vec<FixtureInput>,
    cases: Vec<FixtureCase>,
}

#[derive(Deserialize)]
struct FixtureInput {
    prev_tx: usize,
    output_index: u32,
    path: Vec<u32>,
    public_key: String,
}

#[derive(Deserialize)]
struct FixtureCase {
    name: String,
    mode: String,
    target: Option<usize>,
    responses: Vec<String>,
    expected_frames: Vec<String>,
    expected_signatures: Vec<ExpectedSignature>,
}

#[derive(Deserialize)]
struct ExpectedSignature {
    input_index: usize,
    signature: String,
    approvals: Vec<bool>,
}

fn load_fixture() -> Fixture {
    let raw = include_str!("fixtures/legacy_p2pkh.json");
    serde_json::from_str(raw).expect("fixture is valid json")
}

fn decode_tx(raw: &str) -> Transaction {
    deserialize(&hex::decode(raw).unwrap()).unwrap()
}

fn signing_inputs(fixture: &Fixture) -> Vec<SigningInput> {
    let prev_txs: Vec<Transaction> = fixture.prev_txs.iter().map(|tx| decode_tx(tx)).collect();
    fixture
        .inputs
        .iter()
        .map(|input| {
            SigningInput::builder(
                prev_txs[input.prev_tx].clone(),
                input.output_index,
                input.path.clone(),
            )
            .public_key(hex::decode(&input.public_key).unwrap())
            .build()
            .unwrap()
        })
        .collect()
}

async fn run_case(fixture: &Fixture, case: &FixtureCase) -> (Vec<SignedInput>, Vec<Vec<u8>>) {
    let tx = decode_tx(&fixture.tx);
    let inputs = signing_inputs(fixture);

    let transport =
        ReplayTransport::with_responses(case.responses.iter().map(|r| hex::decode(r).unwrap()));
    let app = LedgerBtcApp::new(transport, Config::default()).unwrap();
    app.open().await.unwrap();

    let signed = match case.mode.as_str() {
        "input" => vec![app
            .sign_input(&tx, &inputs, case.target.unwrap())
            .await
            .unwrap()],
        "transaction" => app.sign_transaction(&tx, &inputs).await.unwrap(),
        other => panic!("unknown mode {}", other),
    };
    assert_eq!(app.adapter().transport().remaining(), 0, "{}", case.name);
    (signed, app.adapter().transport().sent())
}

#[tokio::test]
async fn test_recorded_sessions_replay_frame_for_frame() {
    let _ = env_logger::builder().is_test(true).try_init();
    let fixture = load_fixture();

    for case in &fixture.cases {
        let (signed, sent) = run_case(&fixture, case).await;

        let expected: Vec<Vec<u8>> = case
            .expected_frames
            .iter()
            .map(|f| hex::decode(f).unwrap())
            .collect();
        assert_eq!(sent.len(), expected.len(), "{}", case.name);
        for (i, (got, want)) in sent.iter().zip(expected.iter()).enumerate() {
            assert_eq!(
                hex::encode(got),
                hex::encode(want),
                "{}: frame {} differs",
                case.name,
                i
            );
        }

        assert_eq!(signed.len(), case.expected_signatures.len(), "{}", case.name);
        for (got, want) in signed.iter().zip(case.expected_signatures.iter()) {
            assert_eq!(got.input_index, want.input_index);
            assert_eq!(hex::encode(&got.signature), want.signature);
            assert_eq!(got.approvals, want.approvals);
        }
    }
}

#[tokio::test]
async fn test_signatures_are_normalized_der() {
    let fixture = load_fixture();
    for case in &fixture.cases {
        let (signed, _) = run_case(&fixture, case).await;
        for input in signed {
            assert_eq!(input.signature[0], 0x30);
            // sighash byte of ALL is kept at the end
            assert_eq!(input.signature.last(), Some(&0x01));
        }
    }
}

#[tokio::test]
async fn test_frames_respect_short_apdu_limit() {
    let fixture = load_fixture();
    for case in &fixture.cases {
        let (_, sent) = run_case(&fixture, case).await;
        for frame in sent {
            assert_eq!(frame[0], 0xE0);
            assert!(frame.len() <= 260);
            assert_eq!(frame[4] as usize, frame.len() - 5);
        }
    }
}

#[tokio::test]
async fn test_truncated_recording_aborts_without_signature() {
    let fixture = load_fixture();
    let case = &fixture.cases[0];
    let tx = decode_tx(&fixture.tx);
    let inputs = signing_inputs(&fixture);

    // the device stops answering just before the signature
    let mut responses: Vec<Vec<u8>> = case
        .responses
        .iter()
        .map(|r| hex::decode(r).unwrap())
        .collect();
    responses.pop();
    let app =
        LedgerBtcApp::new(ReplayTransport::with_responses(responses), Config::default()).unwrap();
    app.open().await.unwrap();

    let err = app
        .sign_input(&tx, &inputs, case.target.unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ledger_btc_client_sdk::ProtocolError::Transport(_)
    ));
}

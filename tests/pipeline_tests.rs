use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use fraud_checker::{
    cache::{Fingerprint, Namespace},
    config::AppConfig,
    domain::{Degradation, SignalCategory},
    extract::{OcrEngine, OcrError, OcrOutput},
    infrastructure::shutdown::Shutdown,
    signals::{Brand, BrandBook},
    AnalysisError, AnalysisRequest, FraudChecker, Verdict,
};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR-fixture";

const BENIGN_NOTE: &str = "Olá equipe, a reunião de planejamento foi remarcada para quinta-feira às 15h na sala 2. Tragam os relatórios do trimestre.";

struct FakeOcr {
    text: &'static str,
    calls: AtomicUsize,
}

impl FakeOcr {
    fn new(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            text,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn recognize(&self, _image: &[u8], _language: &str) -> Result<OcrOutput, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OcrOutput {
            text: self.text.to_string(),
            confidence: 0.92,
        })
    }
}

/// Takes its time, so a shutdown can land while it is still reading.
struct SlowOcr {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for SlowOcr {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn recognize(&self, _image: &[u8], _language: &str) -> Result<OcrOutput, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(OcrOutput {
            text: BENIGN_NOTE.to_string(),
            confidence: 0.9,
        })
    }
}

fn config_with_llm(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.llm.api_key = Some("sk-test".into());
    config.llm.api_url = format!("{}/v1/chat/completions", server.uri());
    config.llm.timeout = Duration::from_millis(500);
    config
}

fn completion(label: &str, risk: f64) -> serde_json::Value {
    let content = json!({
        "label": label,
        "risk_score": risk,
        "confidence": 0.9,
        "rationale": "routine internal notice",
        "red_flags": []
    });
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content.to_string() } }]
    })
}

async fn mount_llm(server: &MockServer, response: ResponseTemplate, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(response)
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn bancox_page() -> String {
    r#"<!doctype html>
<html>
  <head><title>BancoX - Internet Banking</title></head>
  <body>
    <main>
      <h1>BancoX</h1>
      <p>Bem-vindo ao BancoX. Para continuar usando sua conta, acesse o portal abaixo.</p>
      <p><a href="https://bancox-secure-login.net/entrar">Acessar minha conta</a></p>
    </main>
  </body>
</html>"#
        .to_string()
}

#[tokio::test]
async fn lookalike_brand_link_escalates_the_verdict() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/promo"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bancox_page(), "text/html; charset=utf-8"))
        .mount(&server)
        .await;

    let checker = FraudChecker::builder(AppConfig::default())
        .brand_book(BrandBook::new(vec![Brand::new("bancox", &["bancox.com.br"])]))
        .build()
        .unwrap();

    let result = checker
        .analyze(&AnalysisRequest::url(format!("{}/promo", server.uri())))
        .await
        .unwrap();

    let brand = result
        .signals
        .iter()
        .find(|s| s.category() == SignalCategory::BrandGuard)
        .expect("brand guard signal");
    assert!(brand.weight() > 0.0);
    assert!(brand.rationale().contains("bancox-secure-login.net"));
    assert!(result.verdict >= Verdict::Suspicious);
    assert_eq!(result.extraction.link_count, 1);
}

#[tokio::test]
async fn benign_image_text_stays_benign() {
    let server = MockServer::start().await;
    mount_llm(&server, ResponseTemplate::new(200).set_body_json(completion("ok", 0.05)), 1).await;

    let ocr = FakeOcr::new(BENIGN_NOTE);
    let checker = FraudChecker::builder(config_with_llm(&server))
        .ocr_engine(ocr.clone())
        .build()
        .unwrap();

    let result = checker.analyze(&AnalysisRequest::image(PNG.to_vec())).await.unwrap();

    assert!(result
        .signals
        .iter()
        .all(|s| s.category() == SignalCategory::Llm));
    assert_eq!(result.verdict, Verdict::Benign);
    assert!(result.score < 0.35);
    assert!(!result.insufficient_signal);
    assert_eq!(ocr.calls(), 1);
}

#[tokio::test]
async fn corrupt_or_empty_image_is_insufficient_signal() {
    let ocr = FakeOcr::new("never used");
    let checker = FraudChecker::builder(AppConfig::default())
        .ocr_engine(ocr.clone())
        .build()
        .unwrap();

    for bytes in [Vec::new(), b"this is not an image".to_vec()] {
        let result = checker.analyze(&AnalysisRequest::image(bytes)).await.unwrap();
        assert!(result.insufficient_signal);
        assert_eq!(result.verdict, Verdict::Benign);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.extraction.text_length, 0);
        assert_eq!(result.extraction.confidence, 0.0);
        assert_eq!(result.extraction.degradation, Some(Degradation::UnreadableImage));
        assert!(result.rationale.starts_with("insufficient signal"));
    }
    assert_eq!(ocr.calls(), 0);
}

#[tokio::test]
async fn ocr_with_no_text_is_insufficient_signal() {
    let checker = FraudChecker::builder(AppConfig::default())
        .ocr_engine(FakeOcr::new("   "))
        .build()
        .unwrap();

    let result = checker.analyze(&AnalysisRequest::image(PNG.to_vec())).await.unwrap();
    assert!(result.insufficient_signal);
    assert!(result.signals.is_empty());
}

#[tokio::test]
async fn repeated_url_is_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aviso"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(bancox_page(), "text/html; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let checker = FraudChecker::from_config(&AppConfig::default()).unwrap();
    let request = AnalysisRequest::url(format!("{}/aviso", server.uri()));

    let first = checker.analyze(&request).await.unwrap();
    let second = checker.analyze(&request).await.unwrap();

    assert_eq!(first, second);
    assert!(checker.cache().stats().hits >= 1);
    server.verify().await;
}

#[tokio::test]
async fn unreachable_page_degrades_instead_of_failing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lento"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = AppConfig::default();
    config.web.fetch_timeout = Duration::from_millis(200);
    let checker = FraudChecker::from_config(&config).unwrap();
    let request = AnalysisRequest::url(format!("{}/lento", server.uri()));

    let result = checker.analyze(&request).await.unwrap();
    assert_eq!(result.extraction.degradation, Some(Degradation::FetchTimeout));
    assert!(result
        .signals
        .iter()
        .any(|s| s.name() == "unreachable_link"));

    // Degraded fetches are not cached.
    checker.analyze(&request).await.unwrap();
}

#[tokio::test]
async fn llm_server_error_keeps_heuristic_signals() {
    let server = MockServer::start().await;
    mount_llm(&server, ResponseTemplate::new(503), 1).await;

    let checker = FraudChecker::from_config(&config_with_llm(&server)).unwrap();
    let result = checker
        .analyze(&AnalysisRequest::text(
            "URGENTE: sua conta foi bloqueada. Confirme sua senha em https://bit.ly/conta-x",
        ))
        .await
        .unwrap();

    assert!(!result.signals.is_empty());
    assert!(result
        .signals
        .iter()
        .all(|s| s.category() != SignalCategory::Llm));
    assert_ne!(result.verdict, Verdict::Benign);
}

#[tokio::test]
async fn llm_timeout_keeps_heuristic_signals() {
    let server = MockServer::start().await;
    mount_llm(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(completion("fraude", 0.99))
            .set_delay(Duration::from_secs(3)),
        1,
    )
    .await;

    let checker = FraudChecker::from_config(&config_with_llm(&server)).unwrap();
    let result = checker
        .analyze(&AnalysisRequest::text("Ganhe um prêmio agora!!! Resgate pelo https://wa.me/5511999999999"))
        .await
        .unwrap();

    assert!(result
        .signals
        .iter()
        .all(|s| s.category() != SignalCategory::Llm));
    assert!(result.signals.iter().any(|s| s.name() == "whatsapp_redirect"));
}

#[tokio::test]
async fn unparsable_llm_answer_is_ignored_and_not_cached() {
    let server = MockServer::start().await;
    let garbage = json!({ "choices": [{ "message": { "content": "I cannot help with that." } }] });
    mount_llm(&server, ResponseTemplate::new(200).set_body_json(garbage), 2).await;

    let checker = FraudChecker::from_config(&config_with_llm(&server)).unwrap();
    let request = AnalysisRequest::text("Clique aqui para atualizar seu cadastro");

    for _ in 0..2 {
        let result = checker.analyze(&request).await.unwrap();
        assert!(result
            .signals
            .iter()
            .all(|s| s.category() != SignalCategory::Llm));
    }
}

#[tokio::test]
async fn identical_content_reuses_the_llm_judgment() {
    let server = MockServer::start().await;
    mount_llm(&server, ResponseTemplate::new(200).set_body_json(completion("fraud", 0.9)), 1).await;

    let checker = FraudChecker::from_config(&config_with_llm(&server)).unwrap();
    let request = AnalysisRequest::text("Seu pacote está retido. Pague a taxa via pix para liberar.");

    let first = checker.analyze(&request).await.unwrap();
    let second = checker.analyze(&request).await.unwrap();

    assert_eq!(first, second);
    let llm = first
        .signals
        .iter()
        .find(|s| s.category() == SignalCategory::Llm)
        .expect("llm signal");
    assert_eq!(llm.weight(), 0.9);
    assert_ne!(first.verdict, Verdict::Benign);
}

#[tokio::test]
async fn same_image_twice_gives_identical_results() {
    let ocr = FakeOcr::new("Parabéns! Você foi sorteado. Resgate seu prêmio em https://bit.ly/premio");
    let checker = FraudChecker::builder(AppConfig::default())
        .ocr_engine(ocr.clone())
        .build()
        .unwrap();
    let request = AnalysisRequest::image(PNG.to_vec());

    let first = checker.analyze(&request).await.unwrap();
    let second = checker.analyze(&request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(ocr.calls(), 1);
    assert!(first.signals.iter().any(|s| s.name() == "visual_prize_phishing"));
    assert_ne!(first.verdict, Verdict::Benign);
}

#[tokio::test]
async fn impersonating_email_is_fraudulent() {
    let eml = concat!(
        "From: \"Itaú Unibanco\" <alerta@itau-seguranca.com>\r\n",
        "Reply-To: suporte@atendimento-rapido.xyz\r\n",
        "To: cliente@example.com\r\n",
        "Subject: Sua conta será bloqueada\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "Prezado cliente, confirme seus dados em https://itau-seguranca.com/login em até 24h.\r\n",
    );

    let checker = FraudChecker::from_config(&AppConfig::default()).unwrap();
    let request = AnalysisRequest::from_upload("aviso.eml", eml.as_bytes().to_vec()).unwrap();
    let result = checker.analyze(&request).await.unwrap();

    assert_eq!(result.verdict, Verdict::Fraudulent);
    assert!(result.score >= 0.60);
    assert_eq!(result.extraction.sender_domain.as_deref(), Some("itau-seguranca.com"));
    assert!(result.signals.iter().any(|s| s.name() == "reply_to_mismatch"));
    assert_eq!(result.actions.len(), 4);
}

#[tokio::test]
async fn broken_brand_list_only_costs_brand_signals() {
    let mut config = AppConfig::default();
    config.reference.brand_list_path = Some("/nonexistent/brands.json".into());
    let checker = FraudChecker::from_config(&config).unwrap();

    let result = checker
        .analyze(&AnalysisRequest::text("URGENTE: confirme sua senha do Itaú hoje"))
        .await
        .unwrap();

    assert!(!result.signals.is_empty());
    assert!(result
        .signals
        .iter()
        .all(|s| s.category() == SignalCategory::Heuristics));
}

#[tokio::test]
async fn scores_stay_within_bounds() {
    let checker = FraudChecker::from_config(&AppConfig::default()).unwrap();
    let inputs = [
        "bom dia",
        "URGENTE!!! Ganhe prêmio, confirme senha, token e pix em https://bit.ly/x e wa.me/551199",
        "Atenciosamente, equipe financeira",
        "https://t.co/abc http://192.168.0.1/login",
    ];

    for text in inputs {
        let result = checker.analyze(&AnalysisRequest::text(text)).await.unwrap();
        assert!((0.0..=1.0).contains(&result.score), "{text}: {}", result.score);
        assert!((0.0..=1.0).contains(&result.confidence));
        assert!(result.signals.iter().all(|s| (0.0..=1.0).contains(&s.weight())));
    }
}

#[tokio::test]
async fn shutdown_during_recognition_caches_nothing() {
    let ocr = Arc::new(SlowOcr {
        delay: Duration::from_millis(400),
        calls: AtomicUsize::new(0),
    });
    let config = AppConfig::default();
    let language = config.ocr.language.clone();
    let checker = FraudChecker::builder(config)
        .ocr_engine(ocr.clone())
        .build()
        .unwrap();
    let request = AnalysisRequest::image(PNG.to_vec());

    let (shutdown, mut listener) = Shutdown::new();
    let trigger = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.trigger();
        }
    });

    let err = checker.analyze_until(&request, &mut listener).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Cancelled));
    trigger.await.unwrap();
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);

    // Outlive the abandoned recognition so a late write would have landed.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let fingerprint = Fingerprint::of(&[PNG, language.as_bytes()]);
    assert!(checker
        .cache()
        .get::<OcrOutput>(Namespace::Ocr, &fingerprint)
        .await
        .is_none());

    let result = checker.analyze(&request).await.unwrap();
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.extraction.degradation, None);
}

#[tokio::test]
async fn dropped_shutdown_handle_does_not_cancel() {
    let (shutdown, mut listener) = Shutdown::new();
    drop(shutdown);

    let checker = FraudChecker::from_config(&AppConfig::default()).unwrap();
    let result = checker
        .analyze_until(&AnalysisRequest::text(BENIGN_NOTE), &mut listener)
        .await
        .unwrap();
    assert_eq!(result.verdict, Verdict::Benign);
}

#[tokio::test]
async fn branded_prize_image_is_fraudulent() {
    let checker = FraudChecker::builder(AppConfig::default())
        .ocr_engine(FakeOcr::new(
            "Parabéns! Você ganhou um prêmio do Itaú. Resgate já o seu.",
        ))
        .build()
        .unwrap();

    let result = checker.analyze(&AnalysisRequest::image(PNG.to_vec())).await.unwrap();

    assert_eq!(result.verdict, Verdict::Fraudulent);
    assert!(result.signals.iter().any(|s| s.name() == "branded_prize_image"));
}

#[tokio::test]
async fn personal_mail_mentioning_a_store_stays_benign() {
    let eml = concat!(
        "From: Maria Souza <maria@gmail.com>\r\n",
        "To: joao@example.com\r\n",
        "Subject: Livro\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "Comprei o livro na Amazon ontem, chega semana que vem.\r\n",
    );

    let checker = FraudChecker::from_config(&AppConfig::default()).unwrap();
    let request = AnalysisRequest::from_upload("livro.eml", eml.as_bytes().to_vec()).unwrap();
    let result = checker.analyze(&request).await.unwrap();

    assert_eq!(result.verdict, Verdict::Benign);
    assert!(result
        .signals
        .iter()
        .all(|s| s.category() != SignalCategory::BrandGuard));
}

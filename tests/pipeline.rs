use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rpc_pipeline::auth::{Algorithm, EncodingKey, KeyError, StaticKey, TokenMetadata};
use rpc_pipeline::resilience::{CircuitBreaker, RateLimiter};
use rpc_pipeline::transport::grpc;
use rpc_pipeline::{
    AuthError, BearerToken, CallContext, Chain, Claims, ClientPipeline, Endpoint, Failure,
    Middleware, Parser, ServerPipeline, Signer,
};
use tonic::metadata::MetadataMap;
use tower::layer::layer_fn;

type Trace = Arc<Mutex<Vec<String>>>;

fn recorder(name: &'static str, trace: &Trace) -> impl Middleware<(), ()> + use<> {
    let trace = Arc::clone(trace);
    layer_fn(move |next: Endpoint<(), ()>| {
        let trace = Arc::clone(&trace);
        Endpoint::from_fn(move |ctx: CallContext, ()| {
            let next = next.clone();
            let trace = Arc::clone(&trace);
            async move {
                trace.lock().unwrap().push(format!("{name}.before"));
                let result = next.invoke(ctx, ()).await;
                trace.lock().unwrap().push(format!("{name}.after"));
                result
            }
        })
    })
}

fn sign(claims: Claims) -> BearerToken {
    Signer::new(EncodingKey::from_secret(b"k1"), Algorithm::HS256, claims)
        .sign()
        .unwrap()
}

/// HMAC-verifying key source that counts lookups.
#[derive(Default)]
struct CountingKeys {
    lookups: AtomicUsize,
}

#[async_trait]
impl rpc_pipeline::KeyFunc for CountingKeys {
    async fn resolve(
        &self,
        _token: &TokenMetadata,
    ) -> Result<jsonwebtoken::DecodingKey, KeyError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(jsonwebtoken::DecodingKey::from_secret(b"k1"))
    }
}

#[tokio::test]
async fn hmac_token_round_trips() {
    let token = sign(Claims::new().with("sub", "svc-a"));
    let parser = Parser::new(StaticKey::hmac(b"k1"), Algorithm::HS256);

    let claims = parser
        .parse(&CallContext::new().with_token(token))
        .await
        .unwrap();
    assert_eq!(claims, Claims::new().with("sub", "svc-a"));
}

#[tokio::test]
async fn wrong_key_is_an_invalid_token() {
    let token = sign(Claims::new().with("sub", "svc-a"));
    let parser = Parser::new(StaticKey::hmac(b"k2"), Algorithm::HS256);

    let result = parser.parse(&CallContext::new().with_token(token)).await;
    assert!(matches!(
        result,
        Err(Failure::Auth(AuthError::InvalidToken(_)))
    ));
}

#[tokio::test]
async fn asymmetric_token_is_rejected_before_key_lookup() {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"svc-a"}"#);
    let token = BearerToken::from(format!("{header}.{payload}.c2lnbmF0dXJl"));

    let keys = Arc::new(CountingKeys::default());
    let parser = Parser::with_shared_keys(keys.clone(), Algorithm::HS256);

    let result = parser.parse(&CallContext::new().with_token(token)).await;
    assert!(matches!(
        result,
        Err(Failure::Auth(AuthError::UnexpectedSigningMethod(
            Algorithm::RS256
        )))
    ));
    assert_eq!(keys.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_token_never_reaches_handler() {
    let reached = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reached);
    let handler = Endpoint::<(), ()>::from_fn(move |_ctx: CallContext, ()| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    let endpoint = ServerPipeline::new("Sum", handler)
        .tracer()
        .parser(Parser::new(StaticKey::hmac(b"k1"), Algorithm::HS256))
        .build();

    let result = endpoint.invoke(CallContext::new(), ()).await;
    assert!(matches!(result, Err(Failure::Auth(AuthError::MissingToken))));
    assert_eq!(reached.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn canonical_client_order_is_nested() {
    let trace = Trace::default();
    let base = {
        let trace = Arc::clone(&trace);
        Endpoint::<(), ()>::from_fn(move |_ctx: CallContext, ()| {
            trace.lock().unwrap().push("base".to_string());
            async { Ok(()) }
        })
    };

    let endpoint = ["tracer", "limiter", "breaker", "signer"]
        .into_iter()
        .fold(Chain::new(), |chain, name| {
            chain.named(name, recorder(name, &trace))
        })
        .service(base);
    endpoint.invoke(CallContext::new(), ()).await.unwrap();

    assert_eq!(
        *trace.lock().unwrap(),
        [
            "tracer.before",
            "limiter.before",
            "breaker.before",
            "signer.before",
            "base",
            "signer.after",
            "breaker.after",
            "limiter.after",
            "tracer.after",
        ]
    );
}

struct RecordingLimiter {
    trace: Trace,
    admit: bool,
}

impl RateLimiter for RecordingLimiter {
    fn try_acquire(&self) -> bool {
        self.trace.lock().unwrap().push("limiter".to_string());
        self.admit
    }
}

struct RecordingBreaker {
    trace: Trace,
}

#[async_trait]
impl CircuitBreaker for RecordingBreaker {
    async fn can_execute(&self) -> bool {
        self.trace.lock().unwrap().push("breaker.before".to_string());
        true
    }

    async fn on_success(&self) {
        self.trace.lock().unwrap().push("breaker.success".to_string());
    }

    async fn on_failure(&self) {
        self.trace.lock().unwrap().push("breaker.failure".to_string());
    }
}

fn client(trace: &Trace, admit: bool) -> ClientPipeline<(), ()> {
    let transport = {
        let trace = Arc::clone(trace);
        Endpoint::<(), ()>::from_fn(move |ctx: CallContext, ()| {
            let signed = ctx.token().is_some();
            trace.lock().unwrap().push(format!("transport(signed={signed})"));
            async { Ok(()) }
        })
    };

    ClientPipeline::new("Calc/Sum", transport)
        .tracer()
        .limiter(Arc::new(RecordingLimiter {
            trace: Arc::clone(trace),
            admit,
        }))
        .breaker(Arc::new(RecordingBreaker {
            trace: Arc::clone(trace),
        }))
        .signer(Signer::new(
            EncodingKey::from_secret(b"k1"),
            Algorithm::HS256,
            Claims::new(),
        ))
}

#[tokio::test]
async fn client_pipeline_applies_canonical_order() {
    let trace = Trace::default();
    let pipeline = client(&trace, true);
    assert_eq!(
        pipeline.chain().stage_names().collect::<Vec<_>>(),
        ["tracer", "limiter", "breaker", "signer"]
    );

    pipeline.build().invoke(CallContext::new(), ()).await.unwrap();
    assert_eq!(
        *trace.lock().unwrap(),
        [
            "limiter",
            "breaker.before",
            "transport(signed=true)",
            "breaker.success"
        ]
    );
}

#[tokio::test]
async fn limiter_rejections_do_not_reach_breaker() {
    let trace = Trace::default();
    let endpoint = client(&trace, false).build();

    let result = endpoint.invoke(CallContext::new(), ()).await;
    assert!(matches!(result, Err(Failure::RateLimited)));
    assert_eq!(*trace.lock().unwrap(), ["limiter"]);
}

#[tokio::test]
async fn concurrent_calls_do_not_share_tokens() {
    let transport = Endpoint::<(), String>::from_fn(|ctx: CallContext, ()| async move {
        ctx.token()
            .map(|token| token.as_str().to_string())
            .ok_or(Failure::Internal("unsigned call".into()))
    });
    let signer = Signer::new(EncodingKey::from_secret(b"k1"), Algorithm::HS256, Claims::new())
        .with_unique_id();
    let endpoint = ClientPipeline::new("Calc/Sum", transport)
        .signer(signer)
        .build();

    let root = CallContext::new();
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let endpoint = endpoint.clone();
            let ctx = root.clone();
            tokio::spawn(async move { endpoint.invoke(ctx, ()).await })
        })
        .collect();

    let mut tokens = HashSet::new();
    for handle in handles {
        tokens.insert(handle.await.unwrap().unwrap());
    }
    assert_eq!(tokens.len(), 16);
    assert!(root.token().is_none());
}

#[tokio::test]
async fn token_travels_through_grpc_metadata() {
    let handler = Endpoint::<(), String>::from_fn(|ctx: CallContext, ()| async move {
        ctx.claims()
            .and_then(Claims::subject)
            .map(str::to_string)
            .ok_or(Failure::Internal("no claims".into()))
    });
    let server = ServerPipeline::new("Calc/Sum", handler)
        .parser(Parser::new(StaticKey::hmac(b"k1"), Algorithm::HS256))
        .build();

    let wire = Arc::new(Mutex::new(MetadataMap::new()));
    let transport = {
        let wire = Arc::clone(&wire);
        Endpoint::<(), ()>::from_fn(move |ctx: CallContext, ()| {
            let result = grpc::attach_token(&ctx, &mut wire.lock().unwrap());
            async move { result }
        })
    };
    let client = ClientPipeline::new("Calc/Sum", transport)
        .signer(Signer::new(
            EncodingKey::from_secret(b"k1"),
            Algorithm::HS256,
            Claims::new().with("sub", "svc-a"),
        ))
        .build();

    client.invoke(CallContext::new(), ()).await.unwrap();

    let inbound = grpc::context_from_metadata(&wire.lock().unwrap());
    let subject = server.invoke(inbound, ()).await.unwrap();
    assert_eq!(subject, "svc-a");
}

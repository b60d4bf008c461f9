use std::time::SystemTime;

use aws_sigv4::http_request::PayloadChecksumKind;
use aws_sigv4::http_request::PercentEncodingMode;
use aws_sigv4::http_request::SignableBody;
use aws_sigv4::http_request::SignableRequest;
use aws_sigv4::http_request::SigningSettings;
use aws_sigv4::sign::v4::SigningParams;
use bytes::Bytes;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use esproxy_aws_v4::Credential;
use esproxy_aws_v4::RequestSigner;
use esproxy_aws_v4::ES_SERVICE;

criterion_group!(benches, bench);
criterion_main!(benches);

const HOST: &str = "search-logs-abc123.us-east-1.es.amazonaws.com";
const PATH: &str = "/logs-*/_search?size=20&from=0";

fn body() -> Bytes {
    Bytes::from(format!(
        r#"{{"query":{{"match":{{"message":"{}"}}}}}}"#,
        "x".repeat(4096)
    ))
}

pub fn bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("aws_v4");

    group.bench_function("esproxy", |b| {
        let cred = Credential::new("access_key_id", "secret_access_key");
        let signer = RequestSigner::new(ES_SERVICE, "us-east-1", HOST);
        let body = body();

        b.iter(|| {
            let req = signer.signable(&http::Method::POST, PATH, body.clone());
            signer.sign(&req, &cred).expect("signing must succeed")
        })
    });

    group.bench_function("aws_sigv4", |b| {
        let mut ss = SigningSettings::default();
        ss.percent_encoding_mode = PercentEncodingMode::Single;
        ss.payload_checksum_kind = PayloadChecksumKind::NoHeader;

        let credentials = aws_credential_types::Credentials::new(
            "access_key_id".to_string(),
            "secret_access_key".to_string(),
            None,
            None,
            "test",
        )
        .into();

        let sp = SigningParams::builder()
            .identity(&credentials)
            .region("us-east-1")
            .name(ES_SERVICE)
            .time(SystemTime::now())
            .settings(ss)
            .build()
            .expect("signing params must be valid")
            .into();

        let uri = format!("https://{HOST}{PATH}");
        let body = body();

        b.iter(|| {
            aws_sigv4::http_request::sign(
                SignableRequest::new(
                    "POST",
                    uri.as_str(),
                    std::iter::empty(),
                    SignableBody::Bytes(&body),
                )
                .expect("signable request must be valid"),
                &sp,
            )
            .expect("signing must succeed")
        })
    });

    group.finish();
}

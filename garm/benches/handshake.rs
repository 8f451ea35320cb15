use anyhow::Result;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use garm::acceptor::ServiceAcceptor;
use garm::testutils::{IssuedToken, MemoryEngine, MemoryPrincipal, MemoryRealm};
use garm_engine_traits::UnparseFlags;

struct Bench {
    realm: MemoryRealm,
    service: MemoryPrincipal,
    client: MemoryPrincipal,
    acceptor: ServiceAcceptor<MemoryEngine>,
}

fn make_bench(detect_replay: bool) -> Result<Bench> {
    let realm = MemoryRealm::new("BENCH.TEST");
    let service = realm.provision_service("kfs", "bench.test");
    let client = MemoryPrincipal::user("alice", "BENCH.TEST");
    let mut acceptor = ServiceAcceptor::new(realm.engine());
    acceptor.init(Some("bench.test"), "kfs", None, detect_replay)?;
    Ok(Bench {
        realm,
        service,
        client,
        acceptor,
    })
}

fn issue(bench: &Bench) -> Result<IssuedToken> {
    bench.realm.issue_token(&bench.client, &bench.service)
}

fn hs(bench: &mut Bench) -> Result<()> {
    let issued = issue(bench)?;
    bench.acceptor.request(&issued.token)?;
    let artifacts = bench.acceptor.reply(UnparseFlags::SHORT)?;
    MemoryRealm::verify_reply(&issued, artifacts.reply())?;
    Ok(())
}

fn criterion_benchmark(c: &mut Criterion) {
    // Replay detection stays off so tokens may repeat across iterations.
    let mut setup = make_bench(false).unwrap();
    c.bench_function("issue_token", |bench| {
        bench.iter(|| {
            issue(black_box(&setup)).unwrap();
        })
    });
    let token = issue(&setup).unwrap().token;
    c.bench_function("request", |bench| {
        bench.iter(|| {
            setup.acceptor.request(black_box(&token)).unwrap();
        })
    });
    c.bench_function("handshake", |bench| {
        bench.iter(|| {
            hs(black_box(&mut setup)).unwrap();
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

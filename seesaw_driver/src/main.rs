//! End-to-end driver for the seesaw protocol suite.
//!
//! Runs every protocol with the given parameters, partly in process and
//! partly across the framed wire transport, and exits non-zero on the first
//! failed check.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use num_bigint::{BigUint, RandBigInt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use seesaw::argmax::{
    run_tree_argmax, LinearArgmaxHelper, LinearArgmaxOwner, TreeArgmaxHelper, TreeArgmaxOwner,
};
use seesaw::comparison::{Backend, ComparerA, ComparerB};
use seesaw::dgk::{DgkA, DgkB};
use seesaw::enc_compare::{
    CompareParams, EncCompareHelper, EncCompareOwner, RevEncCompareHelper, RevEncCompareOwner,
};
use seesaw::fhe::{FheParams, FhePriv};
use seesaw::gc_compare::{GcCompareA, GcCompareB};
use seesaw::gm::GmPriv;
use seesaw::lsic::{LsicA, LsicB};
use seesaw::ot::OtParams;
use seesaw::paillier::{AddCiphertext, Paillier, PaillierPriv};
use seesaw::switch::{SwitchHelper, SwitchOwner};
use seesaw::transport::{drive, pipe, pump, Framed};

/// Exercises comparisons, argmax and the cryptosystem switch end to end.
#[derive(Parser)]
#[command(name = "seesaw_driver")]
struct Args {
    /// Statistical blinding parameter.
    lambda: u32,
    /// Bit width of the compared integers.
    l: usize,
    /// Number of elements in the argmax tests.
    n: usize,
    /// Worker threads for within-round tree-argmax comparisons.
    t: usize,
}

struct Keys {
    gm_sk: GmPriv,
    paillier_sk: PaillierPriv,
}

fn keygen(l: usize, lambda: u32, rng: &mut ChaCha20Rng) -> Keys {
    // the additive plaintext space must hold l + lambda + 2 bits
    let prime_bits = ((l as u64 + lambda as u64) / 2 + 32).max(160);
    Keys {
        gm_sk: GmPriv::keygen(128, rng),
        paillier_sk: PaillierPriv::keygen(prime_bits, rng),
    }
}

fn random_operand(l: usize, rng: &mut ChaCha20Rng) -> BigUint {
    rng.gen_biguint(l as u64)
}

fn comparer_pair(
    keys: &Keys,
    backend: Backend,
    a: &BigUint,
    b: &BigUint,
    l: usize,
    rng: &mut ChaCha20Rng,
) -> (ComparerA, ComparerB) {
    let gm = keys.gm_sk.public().clone();
    let rng_a = ChaCha20Rng::from_seed(rng.gen());
    let rng_b = ChaCha20Rng::from_seed(rng.gen());
    match backend {
        Backend::Lsic => (
            ComparerA::from(LsicA::new(a, l, gm, rng_a)),
            ComparerB::from(LsicB::new(b, l, keys.gm_sk.clone(), rng_b)),
        ),
        Backend::Dgk => (
            ComparerA::from(DgkA::new(a, l, keys.paillier_sk.clone(), gm.clone(), rng_a)),
            ComparerB::from(DgkB::new(b, l, gm, rng_b)),
        ),
        Backend::Gc => (
            ComparerA::from(GcCompareA::new(a, l, gm.clone(), OtParams::default(), rng_a)),
            ComparerB::from(GcCompareB::new(b, l, gm, OtParams::default(), rng_b)),
        ),
    }
}

fn test_backend(keys: &Keys, backend: Backend, l: usize, rng: &mut ChaCha20Rng) -> Result<()> {
    for round in 0..4 {
        let (a, b) = (random_operand(l, rng), random_operand(l, rng));
        let (mut pa, mut pb) = comparer_pair(keys, backend, &a, &b, l, rng);
        pump(&mut pa, &mut pb)?;
        let got = keys.gm_sk.decrypt(&pa.output()?);
        ensure!(
            got == (a < b),
            "{backend:?} round {round}: got {got} for a={a} b={b}"
        );
    }
    // fixed tie polarity
    let a = random_operand(l, rng);
    let (mut pa, mut pb) = comparer_pair(keys, backend, &a, &a, l, rng);
    pump(&mut pa, &mut pb)?;
    ensure!(
        !keys.gm_sk.decrypt(&pa.output()?),
        "{backend:?}: tie must compare as not-less"
    );
    println!("{backend:?} comparison: ok");
    Ok(())
}

fn encrypt(paillier: &Paillier, v: &BigUint, rng: &mut ChaCha20Rng) -> AddCiphertext {
    paillier.encrypt(v, rng)
}

fn test_enc_compare(
    keys: &Keys,
    backend: Backend,
    l: usize,
    lambda: u32,
    rng: &mut ChaCha20Rng,
) -> Result<()> {
    let params = CompareParams::new(l, lambda, backend);
    let paillier = keys.paillier_sk.public().clone();
    for _ in 0..3 {
        let (a, b) = (random_operand(l, rng), random_operand(l, rng));
        let mut owner = EncCompareOwner::new(
            encrypt(&paillier, &a, rng),
            encrypt(&paillier, &b, rng),
            params,
            paillier.clone(),
            keys.gm_sk.clone(),
            ChaCha20Rng::from_seed(rng.gen()),
        )?;
        let mut helper = EncCompareHelper::new(
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::from_seed(rng.gen()),
        )?;
        pump(&mut owner, &mut helper)?;
        ensure!(owner.output()? == (a <= b), "EncCompare: a={a} b={b}");
    }
    println!("EncCompare[{backend:?}]: ok");
    Ok(())
}

/// The reverse wrapper, run across the framed wire transport on two threads.
fn test_rev_enc_compare_wire(
    keys: &Keys,
    backend: Backend,
    l: usize,
    lambda: u32,
    rng: &mut ChaCha20Rng,
) -> Result<()> {
    let params = CompareParams::new(l, lambda, backend);
    let paillier = keys.paillier_sk.public().clone();
    let (a, b) = (random_operand(l, rng), random_operand(l, rng));

    let (stream_owner, stream_helper) = pipe();
    let paillier_sk = keys.paillier_sk.clone();
    let gm = keys.gm_sk.public().clone();
    let helper_seed: [u8; 32] = rng.gen();
    let helper_thread = std::thread::spawn(move || -> Result<bool> {
        let mut helper = RevEncCompareHelper::new(
            params,
            paillier_sk,
            gm,
            ChaCha20Rng::from_seed(helper_seed),
        )?;
        let mut framed = Framed::new(stream_helper);
        drive(&mut framed, &mut helper)?;
        Ok(helper.output_bit()?)
    });

    let mut owner = RevEncCompareOwner::new(
        encrypt(&paillier, &a, rng),
        encrypt(&paillier, &b, rng),
        params,
        paillier,
        keys.gm_sk.clone(),
        ChaCha20Rng::from_seed(rng.gen()),
    )?;
    let mut framed = Framed::new(stream_owner);
    drive(&mut framed, &mut owner)?;

    let got = helper_thread
        .join()
        .map_err(|_| anyhow::anyhow!("helper thread panicked"))?
        .context("helper side failed")?;
    ensure!(got == (b <= a), "Rev_EncCompare over wire: a={a} b={b}");
    println!("Rev_EncCompare[{backend:?}] over wire: ok");
    Ok(())
}

fn test_argmax(
    keys: &Keys,
    l: usize,
    lambda: u32,
    n: usize,
    threads: usize,
    rng: &mut ChaCha20Rng,
) -> Result<()> {
    ensure!(
        l >= 32 || (n as u128) <= (1u128 << l),
        "n must not exceed 2^l for a unique argmax"
    );
    let params = CompareParams::new(l, lambda, Backend::Lsic);
    let paillier = keys.paillier_sk.public().clone();

    // distinct values so the argmax is unique
    let mut v: Vec<BigUint> = Vec::with_capacity(n);
    while v.len() < n {
        let x = random_operand(l, rng);
        if !v.contains(&x) {
            v.push(x);
        }
    }
    let expected = v
        .iter()
        .enumerate()
        .max_by_key(|&(_, x)| x)
        .map(|(i, _)| i)
        .context("n >= 1 was checked above")?;
    let cts: Vec<AddCiphertext> = v.iter().map(|x| encrypt(&paillier, x, rng)).collect();

    let mut owner = LinearArgmaxOwner::new(
        cts.clone(),
        params,
        paillier.clone(),
        keys.gm_sk.clone(),
        ChaCha20Rng::from_seed(rng.gen()),
    )?;
    let mut helper = LinearArgmaxHelper::new(
        n,
        params,
        keys.paillier_sk.clone(),
        keys.gm_sk.public().clone(),
        ChaCha20Rng::from_seed(rng.gen()),
    )?;
    pump(&mut owner, &mut helper)?;
    ensure!(owner.output()? == expected, "linear argmax mismatch");
    println!("Linear argmax (n={n}): ok");

    let mut owner = TreeArgmaxOwner::new(
        cts,
        params,
        paillier,
        keys.gm_sk.clone(),
        ChaCha20Rng::from_seed(rng.gen()),
    )?;
    let mut helper = TreeArgmaxHelper::new(
        n,
        params,
        keys.paillier_sk.clone(),
        keys.gm_sk.public().clone(),
        ChaCha20Rng::from_seed(rng.gen()),
    )?;
    run_tree_argmax(&mut owner, &mut helper, threads)?;
    ensure!(owner.output()? == expected, "tree argmax mismatch");
    println!("Tree argmax (n={n}, t={threads}): ok");
    Ok(())
}

fn test_switch(keys: &Keys, rng: &mut ChaCha20Rng) -> Result<()> {
    let fhe_sk = FhePriv::keygen(FheParams::with_slots(8), rng);
    let bits: Vec<bool> = vec![true, false, true, true, false, false, true, false];
    let cts = bits
        .iter()
        .map(|&b| keys.gm_sk.public().encrypt(b, rng))
        .collect();

    let mut owner = SwitchOwner::new(
        cts,
        keys.gm_sk.public().clone(),
        fhe_sk.public().clone(),
        ChaCha20Rng::from_seed(rng.gen()),
    )?;
    let mut helper = SwitchHelper::new(
        keys.gm_sk.clone(),
        fhe_sk.clone(),
        ChaCha20Rng::from_seed(rng.gen()),
    );
    pump(&mut owner, &mut helper)?;
    ensure!(
        fhe_sk.decrypt_slots(&owner.output()?) == bits,
        "switch slots differ from input bits"
    );
    println!("Cryptosystem switch: ok");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    ensure!(args.l >= 1, "l must be at least 1");
    ensure!(args.n >= 1, "n must be at least 1");
    ensure!(args.t >= 1, "t must be at least 1");

    let mut rng = ChaCha20Rng::seed_from_u64(1);
    println!(
        "lambda={} l={} n={} t={}; generating keys...",
        args.lambda, args.l, args.n, args.t
    );
    let keys = keygen(args.l, args.lambda, &mut rng);

    for backend in [Backend::Lsic, Backend::Dgk, Backend::Gc] {
        test_backend(&keys, backend, args.l, &mut rng)?;
    }
    for backend in [Backend::Lsic, Backend::Dgk, Backend::Gc] {
        test_enc_compare(&keys, backend, args.l, args.lambda, &mut rng)?;
    }
    test_rev_enc_compare_wire(&keys, Backend::Dgk, args.l, args.lambda, &mut rng)?;
    test_argmax(&keys, args.l, args.lambda, args.n, args.t, &mut rng)?;
    test_switch(&keys, &mut rng)?;

    println!("all checks passed");
    Ok(())
}

//! End-to-end runs of every protocol through the public API, both in process
//! and over the framed wire transport.

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
use seesaw::paillier::PaillierPriv;
use seesaw::switch::{SwitchHelper, SwitchOwner};
use seesaw::transport::{drive, pipe, pump, Framed};

struct Keys {
    gm_sk: GmPriv,
    paillier_sk: PaillierPriv,
}

fn keys(seed: u64) -> Keys {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    Keys {
        gm_sk: GmPriv::keygen(128, &mut rng),
        paillier_sk: PaillierPriv::keygen(160, &mut rng),
    }
}

fn comparer_pair(
    keys: &Keys,
    backend: Backend,
    a: u64,
    b: u64,
    l: usize,
    seed: u64,
) -> (ComparerA, ComparerB) {
    let gm = keys.gm_sk.public().clone();
    let (a, b) = (BigUint::from(a), BigUint::from(b));
    let rng_a = ChaCha20Rng::seed_from_u64(seed);
    let rng_b = ChaCha20Rng::seed_from_u64(seed + 1);
    match backend {
        Backend::Lsic => (
            ComparerA::from(LsicA::new(&a, l, gm, rng_a)),
            ComparerB::from(LsicB::new(&b, l, keys.gm_sk.clone(), rng_b)),
        ),
        Backend::Dgk => (
            ComparerA::from(DgkA::new(
                &a,
                l,
                keys.paillier_sk.clone(),
                gm.clone(),
                rng_a,
            )),
            ComparerB::from(DgkB::new(&b, l, gm, rng_b)),
        ),
        Backend::Gc => (
            ComparerA::from(GcCompareA::new(&a, l, gm.clone(), OtParams::default(), rng_a)),
            ComparerB::from(GcCompareB::new(&b, l, gm, OtParams::default(), rng_b)),
        ),
    }
}

fn compare(keys: &Keys, backend: Backend, a: u64, b: u64, l: usize, seed: u64) -> bool {
    let (mut pa, mut pb) = comparer_pair(keys, backend, a, b, l, seed);
    pump(&mut pa, &mut pb).unwrap();
    keys.gm_sk.decrypt(&pa.output().unwrap())
}

#[test]
fn scenario_lsic_90_vs_60() {
    let keys = keys(1);
    assert!(!compare(&keys, Backend::Lsic, 0x5A, 0x3C, 8, 1));
}

#[test]
fn scenario_dgk_60_vs_90() {
    let keys = keys(1);
    assert!(compare(&keys, Backend::Dgk, 0x3C, 0x5A, 8, 1));
}

#[test]
fn scenario_gc_wide() {
    let keys = keys(1);
    assert!(!compare(&keys, Backend::Gc, 0xFFFF, 0x0000, 16, 1));
}

#[test]
fn scenario_ties_have_fixed_polarity() {
    let keys = keys(1);
    for backend in [Backend::Lsic, Backend::Dgk, Backend::Gc] {
        for seed in 1..4 {
            assert!(
                !compare(&keys, backend, 0x12345678, 0x12345678, 32, seed),
                "{backend:?} seed={seed}"
            );
        }
    }
}

#[test]
fn backends_agree_on_random_pairs() {
    let keys = keys(2);
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    for l in [1usize, 2, 13, 64] {
        for i in 0..6 {
            let mask = if l == 64 { u64::MAX } else { (1u64 << l) - 1 };
            let a = rng.gen::<u64>() & mask;
            let b = rng.gen::<u64>() & mask;
            for backend in [Backend::Lsic, Backend::Dgk, Backend::Gc] {
                assert_eq!(
                    compare(&keys, backend, a, b, l, 100 + i),
                    a < b,
                    "{backend:?} l={l} a={a} b={b}"
                );
            }
        }
    }
}

#[test]
fn wide_operands_compare_correctly() {
    let keys = keys(9);
    let l = 256;
    let mut rng = ChaCha20Rng::seed_from_u64(90);
    for backend in [Backend::Lsic, Backend::Gc] {
        let a = rng.gen_biguint(l as u64);
        let b = rng.gen_biguint(l as u64);
        let gm = keys.gm_sk.public().clone();
        let (mut pa, mut pb) = match backend {
            Backend::Lsic => (
                ComparerA::from(LsicA::new(&a, l, gm, ChaCha20Rng::seed_from_u64(91))),
                ComparerB::from(LsicB::new(
                    &b,
                    l,
                    keys.gm_sk.clone(),
                    ChaCha20Rng::seed_from_u64(92),
                )),
            ),
            _ => (
                ComparerA::from(GcCompareA::new(
                    &a,
                    l,
                    gm.clone(),
                    OtParams::default(),
                    ChaCha20Rng::seed_from_u64(93),
                )),
                ComparerB::from(GcCompareB::new(
                    &b,
                    l,
                    gm,
                    OtParams::default(),
                    ChaCha20Rng::seed_from_u64(94),
                )),
            ),
        };
        pump(&mut pa, &mut pb).unwrap();
        assert_eq!(
            keys.gm_sk.decrypt(&pa.output().unwrap()),
            a < b,
            "{backend:?} l={l}"
        );
    }
}

#[test]
fn transcripts_are_deterministic_under_equal_seeds() {
    let keys = keys(3);
    let transcript = |seed: u64| -> Vec<Vec<u8>> {
        let (mut pa, mut pb) = comparer_pair(&keys, Backend::Lsic, 123, 200, 8, seed);
        let mut msgs = Vec::new();
        while !(pa.is_done() && pb.is_done()) {
            if let Some(m) = pa.next().unwrap() {
                msgs.push(bincode::serialize(&m).unwrap());
                pb.accept(&m).unwrap();
            }
            if let Some(m) = pb.next().unwrap() {
                msgs.push(bincode::serialize(&m).unwrap());
                pa.accept(&m).unwrap();
            }
        }
        msgs
    };
    assert_eq!(transcript(11), transcript(11));
    assert_ne!(transcript(11), transcript(12));
}

fn enc_compare_once(keys: &Keys, a: u64, b: u64, l: usize, backend: Backend, seed: u64) -> bool {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let paillier = keys.paillier_sk.public().clone();
    let ct_a = paillier.encrypt(&BigUint::from(a), &mut rng);
    let ct_b = paillier.encrypt(&BigUint::from(b), &mut rng);
    let params = CompareParams::new(l, 40, backend);

    let mut owner = EncCompareOwner::new(
        ct_a,
        ct_b,
        params,
        paillier,
        keys.gm_sk.clone(),
        ChaCha20Rng::seed_from_u64(seed + 1),
    )
    .unwrap();
    let mut helper = EncCompareHelper::new(
        params,
        keys.paillier_sk.clone(),
        keys.gm_sk.public().clone(),
        ChaCha20Rng::seed_from_u64(seed + 2),
    )
    .unwrap();
    pump(&mut owner, &mut helper).unwrap();
    owner.output().unwrap()
}

#[test]
fn enc_compare_all_backends_and_boundaries() {
    let keys = keys(4);
    let l = 16;
    let max = (1u64 << l) - 1;
    for backend in [Backend::Lsic, Backend::Dgk, Backend::Gc] {
        for (i, (a, b)) in [(60u64, 90u64), (90, 60), (90, 90), (0, max), (max, 0), (0, 0)]
            .into_iter()
            .enumerate()
        {
            assert_eq!(
                enc_compare_once(&keys, a, b, l, backend, 200 + i as u64),
                a <= b,
                "{backend:?} a={a} b={b}"
            );
        }
    }
}

#[test]
fn rev_enc_compare_over_the_wire() {
    let keys = keys(5);
    let mut rng = ChaCha20Rng::seed_from_u64(50);
    let paillier = keys.paillier_sk.public().clone();
    let ct_a = paillier.encrypt(&BigUint::from(1000u32), &mut rng);
    let ct_b = paillier.encrypt(&BigUint::from(999u32), &mut rng);
    let params = CompareParams::new(16, 40, Backend::Dgk);

    let (sa, sb) = pipe();
    let paillier_sk = keys.paillier_sk.clone();
    let gm = keys.gm_sk.public().clone();
    let helper_thread = std::thread::spawn(move || {
        let mut helper = RevEncCompareHelper::new(
            params,
            paillier_sk,
            gm,
            ChaCha20Rng::seed_from_u64(51),
        )
        .unwrap();
        let mut framed = Framed::new(sb);
        drive(&mut framed, &mut helper).unwrap();
        helper.output_bit().unwrap()
    });

    let mut owner = RevEncCompareOwner::new(
        ct_a,
        ct_b,
        params,
        paillier,
        keys.gm_sk.clone(),
        ChaCha20Rng::seed_from_u64(52),
    )
    .unwrap();
    let mut framed = Framed::new(sa);
    drive(&mut framed, &mut owner).unwrap();

    // b <= a: 999 <= 1000
    assert!(helper_thread.join().unwrap());
}

fn encrypted_vector(keys: &Keys, v: &[u64], seed: u64) -> Vec<seesaw::paillier::AddCiphertext> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    v.iter()
        .map(|&x| {
            keys.paillier_sk
                .public()
                .encrypt(&BigUint::from(x), &mut rng)
        })
        .collect()
}

#[test]
fn scenario_argmax_linear_and_tree() {
    let keys = keys(6);
    let v = [10u64, 20, 15, 30, 25];
    let params = CompareParams::new(16, 40, Backend::Lsic);

    let mut owner = LinearArgmaxOwner::new(
        encrypted_vector(&keys, &v, 60),
        params,
        keys.paillier_sk.public().clone(),
        keys.gm_sk.clone(),
        ChaCha20Rng::seed_from_u64(61),
    )
    .unwrap();
    let mut helper = LinearArgmaxHelper::new(
        v.len(),
        params,
        keys.paillier_sk.clone(),
        keys.gm_sk.public().clone(),
        ChaCha20Rng::seed_from_u64(62),
    )
    .unwrap();
    pump(&mut owner, &mut helper).unwrap();
    assert_eq!(owner.output().unwrap(), 3);

    let mut owner = TreeArgmaxOwner::new(
        encrypted_vector(&keys, &v, 63),
        params,
        keys.paillier_sk.public().clone(),
        keys.gm_sk.clone(),
        ChaCha20Rng::seed_from_u64(64),
    )
    .unwrap();
    let mut helper = TreeArgmaxHelper::new(
        v.len(),
        params,
        keys.paillier_sk.clone(),
        keys.gm_sk.public().clone(),
        ChaCha20Rng::seed_from_u64(65),
    )
    .unwrap();
    run_tree_argmax(&mut owner, &mut helper, 2).unwrap();
    assert_eq!(owner.output().unwrap(), 3);
}

#[test]
fn argmax_variants_agree_on_larger_vectors() {
    let keys = keys(7);
    let mut rng = ChaCha20Rng::seed_from_u64(70);
    let params = CompareParams::new(16, 40, Backend::Lsic);
    for k in [5usize, 12, 17] {
        // distinct values so the argmax is unique
        let v: Vec<u64> = (0..k)
            .map(|i| ((rng.gen::<u64>() >> 54) << 5) | i as u64)
            .collect();
        let expected = v
            .iter()
            .enumerate()
            .max_by_key(|&(_, x)| x)
            .map(|(i, _)| i)
            .unwrap();

        let mut owner = LinearArgmaxOwner::new(
            encrypted_vector(&keys, &v, 71),
            params,
            keys.paillier_sk.public().clone(),
            keys.gm_sk.clone(),
            ChaCha20Rng::seed_from_u64(72),
        )
        .unwrap();
        let mut helper = LinearArgmaxHelper::new(
            k,
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(73),
        )
        .unwrap();
        pump(&mut owner, &mut helper).unwrap();
        assert_eq!(owner.output().unwrap(), expected, "linear k={k}");

        let mut owner = TreeArgmaxOwner::new(
            encrypted_vector(&keys, &v, 74),
            params,
            keys.paillier_sk.public().clone(),
            keys.gm_sk.clone(),
            ChaCha20Rng::seed_from_u64(75),
        )
        .unwrap();
        let mut helper = TreeArgmaxHelper::new(
            k,
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(76),
        )
        .unwrap();
        run_tree_argmax(&mut owner, &mut helper, 3).unwrap();
        assert_eq!(owner.output().unwrap(), expected, "tree k={k}");
    }
}

#[test]
fn scenario_cryptosystem_switch() {
    let mut rng = ChaCha20Rng::seed_from_u64(80);
    let gm_sk = GmPriv::keygen(128, &mut rng);
    let fhe_sk = FhePriv::keygen(FheParams::with_slots(8), &mut rng);

    let bits = [true, false, true, true, false, false, true, false];
    let cts = bits
        .iter()
        .map(|&b| gm_sk.public().encrypt(b, &mut rng))
        .collect();

    let mut owner = SwitchOwner::new(
        cts,
        gm_sk.public().clone(),
        fhe_sk.public().clone(),
        ChaCha20Rng::seed_from_u64(81),
    )
    .unwrap();
    let mut helper = SwitchHelper::new(gm_sk, fhe_sk.clone(), ChaCha20Rng::seed_from_u64(82));
    pump(&mut owner, &mut helper).unwrap();

    assert_eq!(fhe_sk.decrypt_slots(&owner.output().unwrap()), bits.to_vec());
}

// Integration tests for the variable store
//
// Construction through paths and entries, persistence in both the engine's
// multi-tensor format and pickle checkpoints, and optimizers driven by the
// trainable set.

mod common;

use common::{zip_state_dict, TensorEntry};
use vole::nn::{Init, LrScheduler};
use vole::prelude::*;
use vole::Error;

fn build(vs: &VarStore) -> vole::Result<()> {
    let enc = vs.root().sub("encoder");
    enc.kaiming_uniform("weight", &[4, 3])?;
    enc.zeros("bias", &[4])?;
    let bn = vs.root().sub("bn");
    bn.ones("weight", &[4])?;
    bn.zeros_no_train("running_mean", &[4])?;
    bn.ones_no_train("running_var", &[4])?;
    Ok(())
}

#[test]
fn test_load_exact_mismatch() -> vole::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("t2.bin");
    let src = VarStore::new(Device::Cpu);
    src.root().sub("a").sub("b").ones("t2", &[3])?;
    src.save(&file)?;

    let mut dst = VarStore::new(Device::Cpu);
    dst.root().sub("a").sub("b").zeros("t1", &[3])?;
    match dst.load(&file) {
        Err(Error::MissingParameter(name)) => assert_eq!(name, "a.b.t1"),
        other => panic!("expected MissingParameter, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_load_partial_reports_missing() -> vole::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("t2.bin");
    let src = VarStore::new(Device::Cpu);
    src.root().sub("a").sub("b").ones("t2", &[3])?;
    src.save(&file)?;

    let mut dst = VarStore::new(Device::Cpu);
    let t1 = dst.root().sub("a").sub("b").zeros("t1", &[3])?;
    let missing = dst.load_partial(&file)?;
    assert_eq!(missing, vec!["a.b.t1".to_string()]);
    assert_eq!(t1.to_vec::<f32>()?, vec![0.0; 3]);
    Ok(())
}

#[test]
fn test_save_load_identical_construction() -> vole::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("model.bin");

    let vs = VarStore::new(Device::Cpu);
    build(&vs)?;
    if let Some(mut mean) = vs.root().sub("bn").get("running_mean")? {
        mean.fill_(0.25)?;
    }
    vs.save(&file)?;

    let mut vs2 = VarStore::new(Device::Cpu);
    build(&vs2)?;
    vs2.load(&file)?;

    let a = vs.variables()?;
    let b = vs2.variables()?;
    assert_eq!(a.len(), 5);
    assert_eq!(b.len(), 5);
    for (name, t) in a.iter() {
        assert_eq!(t.mean_f64()?, b[name].mean_f64()?, "{name}");
        assert_eq!(t.to_vec::<f32>()?, b[name].to_vec::<f32>()?, "{name}");
    }
    // Trainable flags survive the copy.
    assert!(b["encoder.weight"].requires_grad()?);
    assert!(!b["bn.running_var"].requires_grad()?);
    Ok(())
}

#[test]
fn test_entry_count_tracks_inserts_and_removals() -> vole::Result<()> {
    let vs = VarStore::new(Device::Cpu);
    let root = vs.root();
    let mut inserted = 0;
    for name in ["a", "b", "c", "d"] {
        root.var(name, &[2], Init::Const(1.0))?;
        inserted += 1;
    }
    assert!(matches!(root.zeros("a", &[2]), Err(Error::PathExists(_))));
    assert!(vs.remove("b")?.is_some());
    assert!(vs.remove("zzz")?.is_none());
    assert_eq!(vs.len(), inserted - 1);
    Ok(())
}

#[test]
fn test_shared_weights_through_entries() -> vole::Result<()> {
    let vs = VarStore::new(Device::Cpu);
    let shared = vs.root().sub("shared");
    let first = shared.entry("embedding").or_randn_standard(&[5, 2])?;
    let second = shared.entry("embedding").or_zeros(&[1])?;
    assert_eq!(second.size()?, vec![5, 2]);
    assert_eq!(first.to_vec::<f32>()?, second.to_vec::<f32>()?);
    assert_eq!(vs.len(), 1);
    assert_eq!(vs.trainable_variables()?.len(), 1);
    Ok(())
}

#[test]
fn test_load_pretrained_checkpoint() -> vole::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pretrained.pt");
    zip_state_dict(
        &path,
        &[
            TensorEntry::f32("fc.weight", "0", &[1.0, 2.0, 3.0, 4.0], &[2, 2]),
            TensorEntry::f32("fc.bias", "1", &[9.0, 8.0], &[2]),
        ],
    );

    let mut vs = VarStore::new(Device::Cpu);
    let (w, b) = {
        let fc = vs.root().sub("fc");
        (fc.zeros("weight", &[2, 2])?, fc.zeros("bias", &[2])?)
    };
    vs.load_pt(&path)?;
    assert_eq!(w.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(b.to_vec::<f32>()?, vec![9.0, 8.0]);
    assert!(w.requires_grad()?);

    let mut bigger = VarStore::new(Device::Cpu);
    bigger.root().sub("fc").zeros("weight", &[2, 2])?;
    bigger.root().sub("fc").zeros("bias", &[2])?;
    bigger.root().sub("head").zeros("weight", &[2])?;
    assert!(matches!(
        bigger.load_pt(&path),
        Err(Error::MissingParameter(ref n)) if n == "head.weight"
    ));
    assert_eq!(bigger.load_pt_partial(&path)?, vec!["head.weight".to_string()]);
    Ok(())
}

#[test]
fn test_optimizer_schedule_and_freeze() -> vole::Result<()> {
    let mut vs = VarStore::new(Device::Cpu);
    let w = vs.root().ones("w", &[2])?;
    let mut opt = Sgd::default().build(&vs, 0.5)?;
    let mut sched = StepLr::new(&opt, 1, 0.5)?;

    let mut handle = w.shallow_clone()?;
    handle.set_grad(&Tensor::from_slice(&[1.0f32, 1.0])?)?;
    opt.step()?;
    assert_eq!(w.to_vec::<f32>()?, vec![0.5, 0.5]);

    sched.step(&mut opt)?;
    assert_eq!(opt.lr()?, 0.25);
    opt.step()?;
    assert_eq!(w.to_vec::<f32>()?, vec![0.25, 0.25]);

    vs.freeze()?;
    assert!(!w.requires_grad()?);
    vs.unfreeze()?;
    assert!(w.requires_grad()?);
    Ok(())
}

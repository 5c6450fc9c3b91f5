use burn::backend::{Autodiff, NdArray};
use kan_pinn::layer::AffineSearch;
use kan_pinn::model::KanConfig;
use kan_pinn::pinn::{boundary_loss, pde_loss};
use kan_pinn::symbolic::SymbolicFn;
use kan_pinn::symbolize::default_fixes;
use kan_pinn::training::{Collocation, FitOptions, TrainingConfig, fit};

type TestBackend = Autodiff<NdArray<f32>>;

fn total_loss(
    model: &kan_pinn::model::Kan<TestBackend>,
    data: &Collocation<TestBackend>,
    alpha: f32,
) -> f32 {
    let pde = pde_loss(model, data.interior.clone()).into_scalar();
    let bc = boundary_loss(model, data.boundary.clone()).into_scalar();
    alpha * pde + bc
}

#[test]
fn train_fix_and_extract_a_formula() {
    let device = Default::default();
    let config = TrainingConfig::new(KanConfig::new(vec![2, 2, 1]))
        .with_interior_points(7)
        .with_boundary_points(7)
        .with_steps(40)
        .with_learning_rate(1e-2)
        .with_stop_grid_update_step(20)
        .with_log_every(20);
    let data = Collocation::<TestBackend>::sample(&config, &device);
    let options = FitOptions::from_config(&config);

    let model = config.model.init::<TestBackend>(&device);
    let initial = total_loss(&model, &data, 0.1);
    let mut history = Vec::new();
    let mut model = fit(model, &data, &options, &mut history).unwrap();
    assert!(total_loss(&model, &data, 0.1) < initial);

    // スプラインのままでは数式を取り出せない
    let names = vec!["x_1".to_string(), "x_2".to_string()];
    assert!(model.symbolic_formula(&names).is_err());

    let search = AffineSearch {
        grid_number: 21,
        ..AffineSearch::default()
    };
    for fix in default_fixes(&model.width()) {
        let (next, fitted) = model
            .fix_symbolic(fix.edge, fix.fun, Some(data.interior.clone()), &search)
            .unwrap();
        let fitted = fitted.unwrap();
        assert!(fitted.r2.is_finite());
        if fix.fun == SymbolicFn::Identity {
            assert_eq!((fitted.a, fitted.b), (1.0, 0.0));
        }
        model = next;
    }

    let retrain = FitOptions {
        steps: 10,
        update_grid: false,
        ..options
    };
    let model = fit(model, &data, &retrain, &mut history).unwrap();
    assert_eq!(history.last().map(|r| r.step), Some(50));
    assert!(total_loss(&model, &data, 0.1).is_finite());

    let formulas = model.symbolic_formula(&names).unwrap();
    assert_eq!(formulas.len(), 1);
    let text = formulas[0].render(4);
    assert!(text.contains("sin("), "{text}");
    assert!(text.contains("x_1") || text.contains("x_2"), "{text}");
}

#[test]
fn refined_model_keeps_training() {
    let device = Default::default();
    let config = TrainingConfig::new(KanConfig::new(vec![2, 2, 1]))
        .with_interior_points(5)
        .with_boundary_points(5)
        .with_steps(5)
        .with_log_every(5);
    let data = Collocation::<TestBackend>::sample(&config, &device);
    let options = FitOptions::from_config(&config);
    let mut history = Vec::new();

    let model = config.model.init::<TestBackend>(&device);
    let model = fit(model, &data, &options, &mut history).unwrap();
    let model = model.refine(10).unwrap();
    assert_eq!(model.grid_size(), 10);
    let model = fit(model, &data, &options, &mut history).unwrap();
    assert!(total_loss(&model, &data, 0.1).is_finite());
    assert_eq!(history.iter().map(|r| r.step).collect::<Vec<_>>(), vec![1, 5, 6, 10]);
}

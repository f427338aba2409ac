use modelfit::*;
use std::cell::RefCell;
use std::time::Duration;

fn close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

fn data(cols: Vec<Vec<f64>>) -> SampleData {
    SampleData::new(cols).unwrap()
}

#[derive(Default)]
struct Recorder {
    kinds: RefCell<Vec<ModelKind>>,
    retries: RefCell<Vec<f64>>,
    failures: RefCell<Vec<String>>,
    finished: RefCell<usize>,
}

impl FitObserver for Recorder {
    fn classified(&self, _model: &str, kind: ModelKind) {
        self.kinds.borrow_mut().push(kind);
    }

    fn solver_retry(&self, _error: &str, initial: f64) {
        self.retries.borrow_mut().push(initial);
    }

    fn solver_failed(&self, error: &str) {
        self.failures.borrow_mut().push(error.to_string());
    }

    fn finished(&self, _report: &FitReport) {
        *self.finished.borrow_mut() += 1;
    }
}

#[test]
fn line_end_to_end() {
    let mut m = EquationModel::new("m*t + c", &["t"]).unwrap();
    let d = data(vec![vec![0., 1., 2., 3., 4.], vec![1., 3., 5., 7., 9.]]);

    let report = fit(&mut m, &d).unwrap();

    let c = m.fitted_constants().unwrap();
    assert!(close(c.get("m").unwrap(), 2., 1e-3));
    assert!(close(c.get("c").unwrap(), 1., 1e-3));
    assert_eq!(m.resulting_function(), Some("2.00*t + 1.00"));

    assert_eq!(report.kind, ModelKind::Regular);
    assert_eq!(report.n, 5);
    assert!(report.ssr < 1e-12);
    assert_eq!(report.constants, *c);
    assert_eq!(report.covariance.as_ref().map(Covariance::dim), Some(2));
}

#[test]
fn noisy_exponential() {
    let mut rng = fastrand::Rng::with_seed(7);

    let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
    let y: Vec<f64> = t
        .iter()
        .map(|t| 3. * (-0.7 * t).exp() + (rng.f64() - 0.5) * 0.01)
        .collect();

    let mut m = EquationModel::new("y = a*exp(-k*t)", &["t"]).unwrap();
    let report = fit(&mut m, &data(vec![t, y])).unwrap();

    let c = m.fitted_constants().unwrap();
    assert!(close(c.get("a").unwrap(), 3., 0.02));
    assert!(close(c.get("k").unwrap(), 0.7, 0.02));

    let metrics = evaluate_fit(report.covariance.as_ref()).unwrap();
    assert_eq!(metrics.std_devs.len(), 2);
    assert!(metrics.std_devs.iter().all(|s| *s > 0. && *s < 0.05));
}

#[test]
fn two_independent_variables() {
    let x1: Vec<f64> = (0..5).map(f64::from).collect();
    let x2 = vec![1., 0., 2., 1., 3.];
    let y = x1.iter().zip(&x2).map(|(a, b)| 1.5 * a - 2. * b + 0.5).collect();

    let mut m = EquationModel::new("p*x1 + q*x2 + r", &["x1", "x2"]).unwrap();
    fit(&mut m, &data(vec![x1, x2, y])).unwrap();

    let c = m.fitted_constants().unwrap();
    assert!(close(c.get("p").unwrap(), 1.5, 1e-3));
    assert!(close(c.get("q").unwrap(), -2., 1e-3));
    assert!(close(c.get("r").unwrap(), 0.5, 1e-3));
    assert_eq!(
        m.resulting_function(),
        Some("1.50*x1 - 2.00*x2 + 0.50")
    );
}

#[test]
fn vector_model() {
    let t = vec![0., 1., 2., 3., 4.];
    let x = t.iter().map(|t| 2. * t).collect();
    let y = t.iter().map(|t| 3. + t).collect();

    let mut m = EquationModel::new("a*t, b + t", &["t"]).unwrap();
    let report = fit(&mut m, &data(vec![t, x, y])).unwrap();

    let c = m.fitted_constants().unwrap();
    assert!(close(c.get("a").unwrap(), 2., 1e-3));
    assert!(close(c.get("b").unwrap(), 3., 1e-3));
    assert_eq!(report.kind, ModelKind::Vector { components: 2 });
    assert_eq!(m.resulting_function(), Some("2.00*t, 3.00 + t"));
}

#[test]
fn vector_components_are_not_swapped() {
    // with distinct scales, pairing a component with the wrong column cannot fit exactly
    let t = vec![1., 2., 3., 4.];
    let x = t.iter().map(|t| 10. * t).collect();
    let y = t.iter().map(|t| 0.1 * t * t).collect();

    let mut m = EquationModel::new("a*t, b*t**2", &["t"]).unwrap();
    let report = fit(&mut m, &data(vec![t, x, y])).unwrap();

    let c = m.fitted_constants().unwrap();
    assert!(close(c.get("a").unwrap(), 10., 1e-3));
    assert!(close(c.get("b").unwrap(), 0.1, 1e-3));
    assert!(report.ssr < 1e-9);
}

#[test]
fn first_order_ode() {
    let t: Vec<f64> = (0..9).map(|i| i as f64 * 0.5).collect();
    let y = t.iter().map(|t| (-0.5 * t).exp()).collect();

    let mut m = EquationModel::new("y' = -k*y", &["y"]).unwrap();
    let report = fit(&mut m, &data(vec![t, y])).unwrap();

    let k = m.fitted_constants().unwrap().get("k").unwrap();
    assert!(close(k, 0.5, 1e-3), "k = {k}");
    assert_eq!(
        report.kind,
        ModelKind::Ode {
            notation: OdeNotation::Prime
        }
    );
    assert!(report.covariance.is_none());
    assert!(matches!(
        evaluate_fit(report.covariance.as_ref()),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn ode_with_time_argument() {
    // dy/dt = a*t, y(0) = 1 gives y = 1 + a*t^2/2
    let t: Vec<f64> = (0..11).map(|i| i as f64 * 0.2).collect();
    let y = t.iter().map(|t| 1. + 1.5 * t * t).collect();

    let mut m = EquationModel::new("dy/dt = a*t", &["t", "y"]).unwrap();
    let report = fit(&mut m, &data(vec![t, y])).unwrap();

    // a single simplex can stall either side of the minimum
    let a = m.fitted_constants().unwrap().get("a").unwrap();
    assert!(close(a, 3., 1e-4), "a = {a}");
    assert!(report.ssr < 1e-8, "ssr = {}", report.ssr);
}

#[test]
fn ode_state_must_be_the_differentiated_variable() {
    let t: Vec<f64> = (0..9).map(|i| i as f64 * 0.5).collect();
    let y: Vec<f64> = t.iter().map(|t| (-0.5 * t).exp()).collect();

    for (model, vars) in [("y' = -k*y", ["t"]), ("dy/dt = a*t", ["t"])] {
        let mut m = EquationModel::new(model, &vars).unwrap();
        let err = fit(&mut m, &data(vec![t.clone(), y.clone()])).unwrap_err();

        match err {
            Error::InvalidInput(msg) => assert!(msg.contains("'y'"), "{msg}"),
            e => panic!("unexpected error {e:?}"),
        }
        assert!(m.fitted_constants().is_none());
    }

    let mut m = EquationModel::new("dy/dt = a*x", &["x", "y"]).unwrap();
    let err = fit(&mut m, &data(vec![t, y])).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn ode_iteration_cap_fails_the_fit() {
    let t: Vec<f64> = (0..9).map(|i| i as f64 * 0.5).collect();
    let y = t.iter().map(|t| (-0.5 * t).exp()).collect();

    let opts = FitOptions {
        max_iterations: 1,
        ..Default::default()
    };
    let mut m = EquationModel::new("y' = -k*y", &["y"]).unwrap();
    let err = Fitter::new(opts)
        .fit(&mut m, &data(vec![t, y]))
        .unwrap_err();

    match err {
        Error::FittingFailure { detail } => assert!(detail.contains("iterations"), "{detail}"),
        e => panic!("unexpected error {e:?}"),
    }
    assert!(m.fitted_constants().is_none());
}

#[test]
fn ode_timeout_fails_the_fit() {
    let t: Vec<f64> = (0..9).map(|i| i as f64 * 0.5).collect();
    let y = t.iter().map(|t| (-0.5 * t).exp()).collect();

    let opts = FitOptions {
        timeout: Some(Duration::from_nanos(1)),
        ..Default::default()
    };
    let rec = Recorder::default();
    let mut m = EquationModel::new("y' = -k*y", &["y"]).unwrap();
    let err = Fitter::new(opts)
        .with_observer(&rec)
        .fit(&mut m, &data(vec![t, y]))
        .unwrap_err();

    assert!(matches!(err, Error::FittingFailure { .. }));
    assert_eq!(rec.failures.borrow().len(), 1);
    assert_eq!(*rec.finished.borrow(), 0);
    assert!(m.fitted_constants().is_none());
}

#[test]
fn second_order_ode() {
    // y'' = k*y with y = exp(2t) gives k = 4
    let t: Vec<f64> = (0..51).map(|i| i as f64 * 0.02).collect();
    let y = t.iter().map(|t| (2. * t).exp()).collect();

    let mut m = EquationModel::new("y'' = k*y", &["y"]).unwrap();
    fit(&mut m, &data(vec![t, y])).unwrap();

    let k = m.fitted_constants().unwrap().get("k").unwrap();
    assert!(close(k, 4., 0.3), "k = {k}");
}

#[test]
fn second_sample_initial_condition() {
    // an outlying first sample drags the decay rate up when it seeds the solution
    let t: Vec<f64> = (0..9).map(|i| i as f64 * 0.5).collect();
    let mut y: Vec<f64> = t.iter().map(|t| (-0.5 * t).exp()).collect();
    y[0] = 3.;

    let k_for = |ode_initial_sample| {
        let opts = FitOptions {
            ode_initial_sample,
            ..Default::default()
        };
        let mut m = EquationModel::new("y' = -k*y", &["y"]).unwrap();
        let report = Fitter::new(opts)
            .fit(&mut m, &data(vec![t.clone(), y.clone()]))
            .unwrap();
        assert!(report.ssr > 0.);
        report.constants.get("k").unwrap()
    };

    let first = k_for(InitialSample::First);
    let second = k_for(InitialSample::Second);
    assert!(first > second + 0.1, "first = {first}, second = {second}");
}

#[test]
fn ode_retries_with_scaled_initial_condition() {
    // y' = k*y^2 blows up at t = 1/(k*y0): from y0 = 10 before the last sample, from 1 after it
    let t = vec![0., 0.25, 0.5];
    let y = vec![10., 1.4, 2.];

    let rec = Recorder::default();
    let mut m = EquationModel::new("y' = k*y^2", &["y"]).unwrap();
    let report = Fitter::default()
        .with_observer(&rec)
        .fit(&mut m, &data(vec![t, y]))
        .unwrap();

    let retries = rec.retries.borrow();
    assert!(!retries.is_empty());
    assert!(close(retries[0], 1., 1e-12));
    assert!(rec.failures.borrow().is_empty());
    assert_eq!(*rec.finished.borrow(), 1);
    assert!(report.ssr.is_finite());
    assert!(m.fitted_constants().unwrap().get("k").unwrap().is_finite());
}

#[test]
fn ode_fails_when_retry_fails() {
    let t = vec![0., 0.5, 1.];
    let y = vec![100., 50., 20.];

    let rec = Recorder::default();
    let mut m = EquationModel::new("y' = k*y^2", &["y"]).unwrap();
    let err = Fitter::default()
        .with_observer(&rec)
        .fit(&mut m, &data(vec![t, y]))
        .unwrap_err();

    assert!(matches!(err, Error::FittingFailure { .. }));
    assert_eq!(rec.retries.borrow().len(), 1);
    assert_eq!(rec.failures.borrow().len(), 1);
    assert_eq!(*rec.finished.borrow(), 0);
    assert!(m.fitted_constants().is_none());
    assert!(m.resulting_function().is_none());
}

#[test]
fn ode_rejects_unsorted_time() {
    let mut m = EquationModel::new("y' = -k*y", &["y"]).unwrap();
    let err = fit(&mut m, &data(vec![vec![0., 2., 1.], vec![1., 0.5, 0.7]])).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn observer_sees_classification() {
    let rec = Recorder::default();
    let mut m = EquationModel::new("m*t + c", &["t"]).unwrap();
    Fitter::default()
        .with_observer(&rec)
        .fit(&mut m, &data(vec![vec![0., 1., 2.], vec![1., 2., 3.]]))
        .unwrap();

    assert_eq!(*rec.kinds.borrow(), [ModelKind::Regular]);
    assert_eq!(*rec.finished.borrow(), 1);
    assert!(rec.retries.borrow().is_empty());
}

#[test]
fn dimension_mismatch_leaves_model_unfitted() {
    let mut m = EquationModel::new("a*t, b + t", &["t"]).unwrap();
    let err = fit(&mut m, &data(vec![vec![0., 1.], vec![1., 2.]])).unwrap_err();

    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert!(m.fitted_constants().is_none());
}

#[test]
fn nothing_to_fit() {
    let mut m = EquationModel::new("2*t + 1", &["t"]).unwrap();
    let err = fit(&mut m, &data(vec![vec![0., 1.], vec![1., 3.]])).unwrap_err();
    assert!(matches!(err, Error::NothingToFit));
}

#[test]
fn e_is_fitted_like_any_constant() {
    let mut m = EquationModel::new("a*t + e", &["t"]).unwrap();
    let d = data(vec![vec![0., 1., 2., 3.], vec![1., 3., 5., 7.]]);
    fit(&mut m, &d).unwrap();

    let c = m.fitted_constants().unwrap();
    assert!(close(c.get("a").unwrap(), 2., 1e-3));
    assert!(close(c.get("e").unwrap(), 1., 1e-3));
    assert_eq!(m.resulting_function(), Some("2.00*t + 1.00"));
}

#[test]
fn no_covariance_without_degrees_of_freedom() {
    let mut m = EquationModel::new("a*t + b", &["t"]).unwrap();
    let report = fit(&mut m, &data(vec![vec![0., 1.], vec![1., 3.]])).unwrap();

    let c = m.fitted_constants().unwrap();
    assert!(close(c.get("a").unwrap(), 2., 1e-3));
    assert!(close(c.get("b").unwrap(), 1., 1e-3));
    assert!(report.covariance.is_none());
    assert!(evaluate_fit(report.covariance.as_ref()).is_err());
}

#[test]
fn too_few_points_fail() {
    let mut m = EquationModel::new("a*t**2 + b*t + c", &["t"]).unwrap();
    let err = fit(&mut m, &data(vec![vec![0., 1.], vec![1., 3.]])).unwrap_err();
    assert!(matches!(err, Error::FittingFailure { .. }));
    assert!(m.fitted_constants().is_none());
}

#[test]
fn refit_is_rejected() {
    let d = data(vec![vec![0., 1., 2.], vec![1., 3., 5.]]);
    let mut m = EquationModel::new("m*t + c", &["t"]).unwrap();
    fit(&mut m, &d).unwrap();

    assert!(matches!(fit(&mut m, &d), Err(Error::AlreadyFitted(_))));
}

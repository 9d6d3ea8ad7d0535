//! Ready-made model specifications.
//!
//! Each preset is a complete specification list for the builder: resolution
//! shapes `sigResPass` / `sigResFail`, background shapes `bkgPass` / `bkgFail`
//! and every parameter they use.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelPreset {
    /// Gaussian resolution, edge background (pass) and Chebychev background (fail).
    #[default]
    Nominal,
    /// Crystal-ball-plus-Gaussian resolution.
    AltSig,
    /// Crystal-ball resolution, edge backgrounds and an extra fail Gaussian.
    AltSigGaus,
    /// Gaussian resolution with exponential backgrounds in both channels.
    ///
    /// The fail slope `alphaF` floats on its own. The older alternative
    /// background list (`alphaP` plus an `a0`, `a1`, `a2` triplet with no fail
    /// slope) names no fail shape for the triplet, so it is not reproduced.
    AltBkg,
}

const NOMINAL: &[&str] = &[
    "meanP[-0.0,-5.0,5.0]",
    "sigmaP[0.9,0.5,5.0]",
    "meanF[-0.0,-5.0,5.0]",
    "sigmaF[0.9,0.5,5.0]",
    "acmsP[60.,50.,80.]",
    "betaP[0.05,0.01,0.08]",
    "gammaP[0.1, -2, 2]",
    "peakP[90.0]",
    "{a0[-0.9,-1.5,-0.5],a1[0.2,0.,0.5],a2[0.,-0.5,0.5]}",
    "Gaussian::sigResPass(x, meanP, sigmaP)",
    "Gaussian::sigResFail(x, meanF, sigmaF)",
    "RooCMSShape::bkgPass(x, acmsP, betaP, gammaP, peakP)",
    "Chebychev::bkgFail(x, {a0, a1, a2})",
];

const ALT_SIG: &[&str] = &[
    "meanP[1.0,-4.0,0.0]",
    "sigmaP[2.4,2.0,3.8]",
    "alphaP[2.0,0.2,2.5]",
    "nP[3.0,1.0,6.0]",
    "sigmaP_2[2.011,1.0,3.0]",
    "sosP[1,0.1,2.0]",
    "meanF[-0.0,-4.0,0.0]",
    "sigmaF[2,0.7,6.0]",
    "alphaF[2.0,0.2,2.5]",
    "nF[3,-5,5]",
    "sigmaF_2[2.0,0.5,6.0]",
    "sosF[1,0.1,2.0]",
    "acmsP[60.,50.,150.]",
    "betaP[0.04,0.01,0.06]",
    "gammaP[0.1, 0.001, 1]",
    "peakP[90.0]",
    "{a0[-0.84,-2.2,-0.0],a1[0.324,0.2,0.4],a2[-0.088,-0.15,-0.0]}",
    "RooCBExGaussShape::sigResPass(x, meanP, sigmaP, alphaP, nP, sigmaP_2, sosP)",
    "RooCBExGaussShape::sigResFail(x, meanF, sigmaF, alphaF, nF, sigmaF_2, sosF)",
    "RooCMSShape::bkgPass(x, acmsP, betaP, gammaP, peakP)",
    "Chebychev::bkgFail(x, {a0, a1, a2})",
];

const ALT_SIG_GAUS: &[&str] = &[
    "meanP[-0.0,-5.0,5.0]",
    "sigmaP[1,0.7,6.0]",
    "alphaP[2.0,1.2,3.5]",
    "nP[3,-5,5]",
    "sigmaP_2[1.5,0.5,6.0]",
    "sosP[1,0.5,5.0]",
    "meanF[-0.0,-5.0,5.0]",
    "sigmaF[2,0.7,6.0]",
    "alphaF[2.0,1.2,3.5]",
    "nF[3,-5,5]",
    "sigmaF_2[2.0,0.5,6.0]",
    "sosF[1,0.5,5.0]",
    "meanGF[80.0,70.0,100.0]",
    "sigmaGF[15,5.0,125.0]",
    "acmsP[60.,50.,75.]",
    "betaP[0.04,0.01,0.06]",
    "gammaP[0.1, 0.005, 1]",
    "peakP[90.0]",
    "acmsF[60.,50.,85.]",
    "betaF[0.04,0.01,0.06]",
    "gammaF[0.1, 0.005, 1]",
    "peakF[90.0]",
    "RooCBExGaussShape::sigResPass(x, meanP, sigmaP, alphaP, nP, sigmaP_2, sosP)",
    "RooCBExGaussShape::sigResFail(x, meanF, sigmaF, alphaF, nF, sigmaF_2, sosF)",
    "Gaussian::sigGaussFail(x, meanGF, sigmaGF)",
    "RooCMSShape::bkgPass(x, acmsP, betaP, gammaP, peakP)",
    "RooCMSShape::bkgFail(x, acmsF, betaF, gammaF, peakF)",
];

const ALT_BKG: &[&str] = &[
    "meanP[-0.0,-5.0,5.0]",
    "sigmaP[0.9,0.5,5.0]",
    "meanF[-0.0,-5.0,5.0]",
    "sigmaF[0.9,0.5,5.0]",
    "alphaP[0.,-5.,5.]",
    "alphaF[0.,-5.,5.]",
    "Gaussian::sigResPass(x, meanP, sigmaP)",
    "Gaussian::sigResFail(x, meanF, sigmaF)",
    "Exponential::bkgPass(x, alphaP)",
    "Exponential::bkgFail(x, alphaF)",
];

impl ModelPreset {
    pub fn lines(self) -> &'static [&'static str] {
        match self {
            ModelPreset::Nominal => NOMINAL,
            ModelPreset::AltSig => ALT_SIG,
            ModelPreset::AltSigGaus => ALT_SIG_GAUS,
            ModelPreset::AltBkg => ALT_BKG,
        }
    }

    pub fn specification(self) -> Vec<String> {
        self.lines().iter().map(|l| l.to_string()).collect()
    }

    /// Whether the fail model needs the auxiliary Gaussian.
    pub fn uses_aux_gaussian(self) -> bool {
        matches!(self, ModelPreset::AltSigGaus)
    }
}
